pub mod error;
pub mod health;
pub mod observations;
pub mod predictions;
pub mod response;
pub mod v1;

use axum::{http::StatusCode, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::Config, engine::StageForecaster};

#[derive(Clone)]
pub struct AppState {
    pub forecaster: Arc<StageForecaster>,
}

impl AppState {
    pub fn new(forecaster: StageForecaster) -> Self {
        Self {
            forecaster: Arc::new(forecaster),
        }
    }
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .nest("/api/v1", v1::router(state))
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(cfg.server.request_timeout_secs),
                )),
        )
        .layer(TraceLayer::new_for_http())
}
