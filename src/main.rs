use anyhow::{Context, Result};
use axum::Router;
use loadshed_forecast::config::Config;
use loadshed_forecast::telemetry::{self, init_tracing};
use loadshed_forecast::{api, history::HistoryBuffer, ml::ArtifactBundle, StageForecaster};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;

    // Artifact skew is fatal: refuse to serve rather than predict on a
    // mismatched layout.
    let bundle = ArtifactBundle::load(&cfg.artifacts)
        .with_context(|| format!("loading artifacts from {}", cfg.artifacts.dir.display()))?;

    let history = Arc::new(HistoryBuffer::new(cfg.history.retention_hours));
    let forecaster = StageForecaster::new(history, bundle);
    let app: Router = api::router(api::AppState::new(forecaster), &cfg);

    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!(
            "WARNING: Server binding to 0.0.0.0 - service will be accessible from network! \
            For production, bind to 127.0.0.1 unless behind a firewall/reverse proxy."
        );
    }

    info!(%addr, "starting load-shedding forecaster");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
