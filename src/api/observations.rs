use axum::{
    extract::{Path, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ApiError;
use super::response::ApiResponse;
use super::AppState;
use crate::domain::{LocationId, Observation};

#[derive(Debug, Serialize)]
pub struct Recorded {
    pub location: LocationId,
    pub timestamp: DateTime<Utc>,
    /// Observations now held for the location
    pub buffered: usize,
}

/// POST /api/v1/observations/:location
pub async fn record_observation(
    State(state): State<AppState>,
    Path(location): Path<String>,
    WithRejection(Json(observation), _): WithRejection<Json<Observation>, ApiError>,
) -> Result<ApiResponse<Recorded>, ApiError> {
    let location = LocationId::new(location);
    let timestamp = observation.timestamp();
    state.forecaster.ingest(&location, observation)?;

    let buffered = state.forecaster.history().len(&location);
    Ok(ApiResponse::accepted(Recorded {
        location,
        timestamp,
        buffered,
    }))
}
