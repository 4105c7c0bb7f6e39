use std::{env, time::Duration};

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub backend_url: String,
    pub poll_interval: Duration,
    pub port: u16,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    pub request_max_bytes: usize,
    pub metrics_key: Option<String>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".into(),
            poll_interval: Duration::from_millis(500),
            port: 8000,
            http_timeout_secs: 15,
            http_connect_timeout_secs: 5,
            request_max_bytes: 256 * 1024,
            metrics_key: None,
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend_url: env::var("STUDIO_BACKEND_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.backend_url),
            poll_interval: parse_env::<u64>("STUDIO_POLL_INTERVAL_MS")
                .filter(|v| *v >= 1)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            port: parse_env("PORT").unwrap_or(defaults.port),
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout_secs),
            http_connect_timeout_secs: parse_env("HTTP_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.http_connect_timeout_secs),
            request_max_bytes: parse_env::<usize>("REQUEST_MAX_BYTES")
                .filter(|v| *v > 0)
                .unwrap_or(defaults.request_max_bytes),
            metrics_key: env::var("METRICS_KEY").ok().filter(|v| !v.is_empty()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
