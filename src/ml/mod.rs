//! Machine Learning Module
//!
//! Inference-time half of the stage forecaster:
//! - Normalization of feature vectors with the persisted scaler
//! - Stage predictors (tree ensembles, softmax regression, rule-based)
//! - Ordered fallback selection across predictors
//! - Loading the artifact bundle published by the training job
//!
//! Training itself happens offline and is not part of this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod artifacts;
pub mod models;
pub mod scaler;
pub mod selector;

pub use artifacts::{ArtifactBundle, ArtifactError};
pub use models::{PredictorKind, PredictorOutcome, StageDistribution, StagePredictor, UnavailableReason};
pub use scaler::{NormalizationError, NormalizedVector, StandardScaler};
pub use selector::{FallbackSelector, LoadState, ModelStatus, Selection, SkippedModel};

/// Metadata carried by every persisted predictor artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    /// Artifact version as published by training
    pub version: String,
    /// Feature manifest the model was fitted against
    pub manifest_version: String,
    pub n_features: usize,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub training_samples: Option<usize>,
}

impl ModelMetadata {
    /// Metadata for a model built in code (tests, rule-based fallback).
    pub fn ad_hoc(model_id: impl Into<String>, manifest_version: impl Into<String>, n_features: usize) -> Self {
        Self {
            model_id: model_id.into(),
            version: "0.0.0".to_string(),
            manifest_version: manifest_version.into(),
            n_features,
            trained_at: None,
            training_samples: None,
        }
    }
}
