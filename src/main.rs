use eyre::WrapErr;
use listing_studio::{
    HttpBackend, Studio, StudioConfig,
    api::{self, AppState},
    poller::JobPoller,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "studio.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = StudioConfig::from_env();
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let backend = Arc::new(HttpBackend::new(&config));
    let studio = Studio::new(backend, JobPoller::new(config.poll_interval));
    let state = AppState {
        studio: Arc::new(studio),
        prometheus_handle,
        metrics_key: config.metrics_key.clone(),
    };
    let app = api::router(state, &config);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "studio.api", backend = %config.backend_url, "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .await
        .wrap_err("serving http")?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
