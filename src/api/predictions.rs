use axum::{extract::State, Json};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::error::ApiError;
use super::response::{success, ApiResponse};
use super::AppState;
use crate::domain::{LocationId, Signal};
use crate::engine::{PredictionRequest, PredictionResult};

/// Values entered by the user for the anchor hour.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Validate)]
pub struct OverridesBody {
    pub temperature_c: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub humidity_pct: Option<f64>,
    #[validate(range(min = 0.0))]
    pub wind_speed_ms: Option<f64>,
    #[validate(range(min = 0.0))]
    pub demand_forecast_mw: Option<f64>,
    #[validate(range(min = 0.0))]
    pub planned_outage_mw: Option<f64>,
}

impl OverridesBody {
    fn into_map(self) -> BTreeMap<Signal, f64> {
        [
            (Signal::TemperatureC, self.temperature_c),
            (Signal::HumidityPct, self.humidity_pct),
            (Signal::WindSpeedMs, self.wind_speed_ms),
            (Signal::DemandForecastMw, self.demand_forecast_mw),
            (Signal::PlannedOutageMw, self.planned_outage_mw),
        ]
        .into_iter()
        .filter_map(|(signal, value)| value.map(|v| (signal, v)))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictBody {
    #[validate(length(min = 1, max = 64))]
    pub location: String,
    pub anchor: DateTime<Utc>,
    #[serde(default)]
    #[validate(nested)]
    pub overrides: OverridesBody,
}

impl From<PredictBody> for PredictionRequest {
    fn from(body: PredictBody) -> Self {
        Self {
            location: LocationId::new(body.location),
            anchor: body.anchor,
            overrides: body.overrides.into_map(),
        }
    }
}

/// At most `engine::MAX_BATCH` requests.
#[derive(Debug, Deserialize, Validate)]
pub struct BatchBody {
    #[validate(length(min = 1, max = 10), nested)]
    pub requests: Vec<PredictBody>,
}

/// One item of a batch answer.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Ok { prediction: PredictionResult },
    Err { error: String },
}

/// POST /api/v1/predictions
pub async fn predict(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<PredictBody>, ApiError>,
) -> Result<ApiResponse<PredictionResult>, ApiError> {
    body.validate()?;
    let result = state.forecaster.predict(&body.into())?;
    Ok(success(result))
}

/// POST /api/v1/predictions/batch
pub async fn predict_batch(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<BatchBody>, ApiError>,
) -> Result<ApiResponse<Vec<BatchItem>>, ApiError> {
    body.validate()?;
    let requests: Vec<PredictionRequest> = body.requests.into_iter().map(Into::into).collect();

    let results = state.forecaster.predict_batch(&requests)?;
    let total = results.len();
    let items: Vec<BatchItem> = results
        .into_iter()
        .map(|r| match r {
            Ok(prediction) => BatchItem::Ok { prediction },
            Err(e) => BatchItem::Err {
                error: ApiError::from(e).to_string(),
            },
        })
        .collect();
    let failed = items.iter().filter(|i| matches!(i, BatchItem::Err { .. })).count();

    Ok(success(items).with_count(total).with_failures(failed))
}
