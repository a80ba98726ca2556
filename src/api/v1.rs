use axum::{
    routing::{get, post},
    Router,
};

use super::{health, observations, predictions, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/models", get(health::model_status))
        .route("/observations/:location", post(observations::record_observation))
        .route("/predictions", post(predictions::predict))
        .route("/predictions/batch", post(predictions::predict_batch))
        .with_state(state)
}
