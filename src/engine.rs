//! Prediction pipeline
//!
//! history snapshot -> current observation (+ user overrides) -> feature
//! vector -> normalized vector -> fallback selection -> result.
//!
//! Everything after the snapshot is synchronous and touches no shared
//! mutable state.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{is_hour_aligned, LocationId, Observation, Signal, Stage, HORIZON_HOURS};
use crate::error::PredictionError;
use crate::features::{FeatureManifest, FeatureTransformer, FeatureVector, LeakageGuard};
use crate::history::HistoryBuffer;
use crate::ml::{ArtifactBundle, FallbackSelector, ModelStatus, Selection, SkippedModel, StandardScaler};

pub const MAX_BATCH: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub location: LocationId,
    pub anchor: DateTime<Utc>,
    /// User-entered values for the anchor hour; they win over buffered ones
    pub overrides: BTreeMap<Signal, f64>,
}

impl PredictionRequest {
    pub fn new(location: impl Into<LocationId>, anchor: DateTime<Utc>) -> Self {
        Self {
            location: location.into(),
            anchor,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, signal: Signal, value: f64) -> Self {
        self.overrides.insert(signal, value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredictionWarning {
    /// Some slots were imputed, partial or defaulted; expect reduced accuracy
    InsufficientHistory { features: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub location: LocationId,
    pub anchor: DateTime<Utc>,
    pub horizon_hours: i64,
    pub target_time: DateTime<Utc>,
    pub stage: Stage,
    pub confidence: f64,
    pub probabilities: [f64; Stage::COUNT],
    pub model_id: String,
    pub manifest_version: String,
    /// sha256 over the unnormalized feature vector
    pub feature_checksum: String,
    pub warnings: Vec<PredictionWarning>,
    /// Predictors that declined before `model_id` answered
    pub skipped_models: Vec<SkippedModel>,
}

impl PredictionResult {
    pub fn has_insufficient_history(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, PredictionWarning::InsufficientHistory { .. }))
    }
}

/// Shared, read-mostly forecaster; one per process.
#[derive(Debug)]
pub struct StageForecaster {
    history: Arc<HistoryBuffer>,
    transformer: FeatureTransformer,
    scaler: Arc<StandardScaler>,
    selector: Arc<FallbackSelector>,
    guard: LeakageGuard,
}

impl StageForecaster {
    pub fn new(history: Arc<HistoryBuffer>, bundle: ArtifactBundle) -> Self {
        Self {
            history,
            transformer: FeatureTransformer::new(bundle.manifest),
            scaler: bundle.scaler,
            selector: bundle.selector,
            guard: LeakageGuard::standard(),
        }
    }

    pub fn history(&self) -> &Arc<HistoryBuffer> {
        &self.history
    }

    pub fn manifest(&self) -> &Arc<FeatureManifest> {
        self.transformer.manifest()
    }

    pub fn model_status(&self) -> Vec<ModelStatus> {
        self.selector.status()
    }

    pub fn ingest(&self, location: &LocationId, observation: Observation) -> Result<(), PredictionError> {
        self.history.record(location, observation)?;
        Ok(())
    }

    /// Feature vector for a request, before normalization.
    pub fn features(&self, request: &PredictionRequest) -> Result<FeatureVector, PredictionError> {
        self.check_request(request)?;

        let snapshot = self.history.snapshot(&request.location, request.anchor);
        let current = snapshot
            .current
            .unwrap_or_else(|| Observation::new(request.anchor))
            .overlay(&request.overrides);

        let features = self
            .transformer
            .transform(&current, &snapshot.window, request.anchor)?;
        Ok(features)
    }

    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, PredictionError> {
        let result = self.run(request);
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(location = %request.location, error = %e, "Refusing to predict: artifact skew");
            }
        }
        result
    }

    /// Independent predictions; one failing item does not fail the others.
    pub fn predict_batch(
        &self,
        requests: &[PredictionRequest],
    ) -> Result<Vec<Result<PredictionResult, PredictionError>>, PredictionError> {
        if requests.len() > MAX_BATCH {
            return Err(PredictionError::InvalidRequest(format!(
                "batch of {} exceeds the limit of {MAX_BATCH}",
                requests.len()
            )));
        }
        Ok(requests.iter().map(|r| self.predict(r)).collect())
    }

    fn run(&self, request: &PredictionRequest) -> Result<PredictionResult, PredictionError> {
        let features = self.features(request)?;
        let normalized = self.scaler.transform(&features)?;

        let (stage, confidence, model_id, distribution, skipped) = match self.selector.select(&normalized) {
            Selection::Answered {
                stage,
                confidence,
                model_id,
                distribution,
                skipped,
            } => (stage, confidence, model_id, distribution, skipped),
            Selection::Exhausted { attempts } => {
                warn!(location = %request.location, anchor = %request.anchor, "No model available");
                return Err(PredictionError::NoModelAvailable { attempts });
            }
        };

        let flagged = features.flagged();
        let warnings = if flagged.is_empty() {
            Vec::new()
        } else {
            vec![PredictionWarning::InsufficientHistory { features: flagged }]
        };

        info!(
            location = %request.location,
            anchor = %request.anchor,
            stage = stage.value(),
            confidence,
            model_id = %model_id,
            skipped = skipped.len(),
            "Prediction served"
        );

        Ok(PredictionResult {
            location: request.location.clone(),
            anchor: request.anchor,
            horizon_hours: HORIZON_HOURS,
            target_time: request.anchor + Duration::hours(HORIZON_HOURS),
            stage,
            confidence,
            probabilities: *distribution.probabilities(),
            model_id,
            manifest_version: features.manifest_version().to_string(),
            feature_checksum: features.checksum(),
            warnings,
            skipped_models: skipped,
        })
    }

    fn check_request(&self, request: &PredictionRequest) -> Result<(), PredictionError> {
        if !is_hour_aligned(&request.anchor) {
            return Err(PredictionError::InvalidRequest(format!(
                "anchor {} is not aligned to the hour",
                request.anchor
            )));
        }
        for (signal, value) in &request.overrides {
            if !signal.admits(*value) {
                let (min, max) = signal.bounds();
                return Err(PredictionError::InvalidRequest(format!(
                    "override {signal} = {value} is outside {min}..={max}"
                )));
            }
            // Only signals read at the anchor hour can be overridden; anything
            // else would be accepted and then ignored.
            let at_anchor = self
                .guard
                .entry(*signal)
                .is_some_and(|e| e.earliest_offset_hours == Some(0));
            if !at_anchor {
                return Err(PredictionError::InvalidRequest(format!(
                    "{signal} cannot be overridden at the anchor hour"
                )));
            }
        }
        Ok(())
    }
}
