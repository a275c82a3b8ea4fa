use std::sync::Arc;

use order_tracker::api;
use order_tracker::config::Config;
use order_tracker::error::AppError;
use order_tracker::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    tracing::info!(
        grace_period_secs = config.tracking.grace_period.as_secs(),
        ingest_interval_ms = config.tracking.ingest_interval.as_millis() as u64,
        delivery_radius_m = config.tracking.delivery_radius_m,
        "tracking engine configured"
    );

    let shared_state = Arc::new(AppState::new(config.tracking.clone()));
    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
