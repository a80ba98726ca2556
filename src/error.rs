use thiserror::Error;

use crate::features::ManifestError;
use crate::history::HistoryError;
use crate::ml::{NormalizationError, SkippedModel};

/// Failure of one ingestion or prediction call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictionError {
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Training/inference skew in the feature layout
    #[error(transparent)]
    FeatureManifest(#[from] ManifestError),

    /// Scaler fitted on a different manifest than the vector
    #[error(transparent)]
    ManifestVersion(#[from] NormalizationError),

    #[error("no model available ({} predictors tried)", .attempts.len())]
    NoModelAvailable { attempts: Vec<SkippedModel> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PredictionError {
    /// Configuration faults: serving must stop until artifacts are fixed.
    /// Everything else only fails the request at hand.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FeatureManifest(_) | Self::ManifestVersion(_))
    }
}
