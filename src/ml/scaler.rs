//! Normalization stage
//!
//! Per-slot z-score transform fitted offline and frozen. Immutable after
//! load, so a single instance is shared across all inference calls.

use serde::{Deserialize, Serialize};

use crate::features::{FeatureManifest, FeatureVector};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizationError {
    #[error(
        "manifest version mismatch: scaler fitted on {expected_version} ({expected_len} slots), \
         vector is {found_version} ({found_len} slots)"
    )]
    ManifestVersion {
        expected_version: String,
        found_version: String,
        expected_len: usize,
        found_len: usize,
    },
    #[error("invalid scaler parameters: {0}")]
    InvalidParameters(String),
}

/// Vector after normalization; the only input predictors accept.
///
/// Vectors produced by [`StandardScaler::transform`] also carry the raw
/// slot values they were computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVector {
    manifest_version: String,
    values: Vec<f64>,
    raw: Option<Vec<f64>>,
}

impl NormalizedVector {
    pub fn new(manifest_version: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            manifest_version: manifest_version.into(),
            values,
            raw: None,
        }
    }

    pub fn with_raw(manifest_version: impl Into<String>, values: Vec<f64>, raw: Vec<f64>) -> Self {
        Self {
            raw: Some(raw),
            ..Self::new(manifest_version, values)
        }
    }

    pub fn manifest_version(&self) -> &str {
        &self.manifest_version
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Unnormalized slot values, when the vector came from a scaler.
    pub fn raw(&self) -> Option<&[f64]> {
        self.raw.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Persisted `(x - mean) / scale` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    manifest_version: String,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(
        manifest_version: impl Into<String>,
        mean: Vec<f64>,
        scale: Vec<f64>,
    ) -> Result<Self, NormalizationError> {
        let scaler = Self {
            manifest_version: manifest_version.into(),
            mean,
            scale,
        };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Pass-through scaler for a manifest (mean 0, scale 1).
    pub fn identity(manifest: &FeatureManifest) -> Self {
        Self {
            manifest_version: manifest.version().to_string(),
            mean: vec![0.0; manifest.len()],
            scale: vec![1.0; manifest.len()],
        }
    }

    /// Re-check invariants; called after deserializing a persisted scaler.
    pub fn validate(&self) -> Result<(), NormalizationError> {
        if self.mean.len() != self.scale.len() {
            return Err(NormalizationError::InvalidParameters(format!(
                "{} means but {} scales",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if let Some(i) = self
            .mean
            .iter()
            .chain(&self.scale)
            .position(|v| !v.is_finite())
        {
            return Err(NormalizationError::InvalidParameters(format!(
                "non-finite parameter at index {}",
                i % self.mean.len().max(1)
            )));
        }
        if let Some(i) = self.scale.iter().position(|v| *v < 0.0) {
            return Err(NormalizationError::InvalidParameters(format!(
                "negative scale at index {i}"
            )));
        }
        Ok(())
    }

    pub fn manifest_version(&self) -> &str {
        &self.manifest_version
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Fail unless the scaler was fitted against `manifest`.
    pub fn check_manifest(&self, manifest: &FeatureManifest) -> Result<(), NormalizationError> {
        self.check(manifest.version(), manifest.len())
    }

    fn check(&self, version: &str, len: usize) -> Result<(), NormalizationError> {
        if version != self.manifest_version || len != self.mean.len() {
            return Err(NormalizationError::ManifestVersion {
                expected_version: self.manifest_version.clone(),
                found_version: version.to_string(),
                expected_len: self.mean.len(),
                found_len: len,
            });
        }
        Ok(())
    }

    pub fn transform(&self, features: &FeatureVector) -> Result<NormalizedVector, NormalizationError> {
        self.check(features.manifest_version(), features.len())?;

        let values = features
            .values()
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                if scale.abs() < 1e-10 {
                    0.0 // constant feature during fitting
                } else {
                    (x - mean) / scale
                }
            })
            .collect();

        Ok(NormalizedVector::with_raw(
            self.manifest_version.clone(),
            values,
            features.values().to_vec(),
        ))
    }
}
