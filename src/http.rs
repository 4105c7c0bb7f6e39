use crate::config::StudioConfig;
use reqwest::Client;
use std::time::Duration;

/// Client for request/response calls; the whole exchange is time-boxed.
pub fn build_client(config: &StudioConfig) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Client for streamed flows. Bodies stay open for the whole workflow, so
/// only connecting is time-boxed.
pub fn build_streaming_client(config: &StudioConfig) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}
