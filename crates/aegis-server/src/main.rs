//! `aegisd`: the SOC backend daemon.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aegis_server::config::Config;
use aegis_server::{build_state, metrics, routes};

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
    metrics::init();

    info!(
        store = if config.store_url.is_empty() { "memory" } else { "rest" },
        identity = !config.identity_url.is_empty(),
        demo = config.demo_mode,
        "initializing Aegis SOC backend"
    );

    let state = build_state(&config);

    // The model blob is loaded before the pipeline opens so scoring is
    // available from the first event.
    match state.pipeline.load_model().await {
        Ok(true) => {}
        Ok(false) => info!("no persisted anomaly model, scoring disabled until trained"),
        Err(e) => warn!(error = %e, "persisted model rejected, scoring disabled until retrained"),
    }

    let cancel = CancellationToken::new();
    let generator = state.pipeline.spawn_generator(
        Duration::from_secs(config.telemetry_interval_seconds),
        cancel.clone(),
    );

    let app = routes::router(state.clone(), &config.cors_origins);
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await.expect("failed to bind port");

    info!(%addr, "aegisd listening");
    info!("  GET  /health              - subsystem readiness");
    info!("  GET  /api/events          - filtered event listing");
    info!("  GET  /api/incidents       - incident listing");
    info!("  POST /api/simulate/attack - attack chain injection");
    info!("  POST /api/ml/train        - anomaly model training");
    info!("  WS   /api/events/live     - live fan-out");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutting down");
        })
        .await
        .expect("server crashed");

    // Stop the generator; cancellation lands at its next sleep boundary.
    cancel.cancel();
    let _ = generator.await;
    info!("generator drained, goodbye");
}
