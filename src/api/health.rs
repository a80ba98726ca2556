use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use super::response::{success, ApiResponse};
use super::AppState;
use crate::ml::{LoadState, ModelStatus};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    manifest_version: String,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    models: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy".to_string(),
            error: Some(error),
        }
    }
}

fn check_models(status: &[ModelStatus]) -> ComponentHealth {
    let loaded = status.iter().filter(|s| s.state == LoadState::Loaded).count();
    if loaded == 0 {
        ComponentHealth::unhealthy(format!("none of {} predictors loaded", status.len()))
    } else {
        ComponentHealth::healthy()
    }
}

/// GET /api/v1/health
///
/// Degraded (503) when no predictor can answer.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let models = check_models(&state.forecaster.model_status());
    let all_healthy = models.status == "healthy";

    let response = HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: chrono::Utc::now(),
        manifest_version: state.forecaster.manifest().version().to_string(),
        checks: HealthChecks { models },
    };

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

/// GET /api/v1/models - fallback order and load state of every predictor
pub async fn model_status(State(state): State<AppState>) -> ApiResponse<Vec<ModelStatus>> {
    let status = state.forecaster.model_status();
    let count = status.len();
    success(status).with_count(count)
}
