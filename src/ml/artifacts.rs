//! Artifact bundle loading
//!
//! Reads what the training job published (manifest, scaler, model files)
//! once at start-up. Manifest or scaler skew is fatal. A single model file
//! that is missing or unreadable only costs that model its slot in the
//! fallback order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::models::{
    GradientBoostedTrees, PredictorKind, RandomForest, RuleBasedPredictor, SoftmaxRegression, StagePredictor,
    UnavailableReason, UnloadedPredictor,
};
use super::{FallbackSelector, ModelMetadata, NormalizationError, StandardScaler};
use crate::config::{ArtifactsConfig, ModelConfig};
use crate::features::transformer::encode_hex;
use crate::features::{FeatureManifest, ManifestError, PublishedManifest};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error("model {model_id} was trained on manifest {found}, serving {expected}")]
    ModelManifest {
        model_id: String,
        expected: String,
        found: String,
    },
    #[error("no predictors configured")]
    NoPredictors,
}

impl ArtifactError {
    /// Training/inference skew, as opposed to an unreadable file.
    pub fn is_skew(&self) -> bool {
        matches!(
            self,
            Self::Manifest(_) | Self::Normalization(_) | Self::ModelManifest { .. }
        )
    }
}

/// Everything inference needs, immutable after construction.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub manifest: Arc<FeatureManifest>,
    pub scaler: Arc<StandardScaler>,
    pub selector: Arc<FallbackSelector>,
}

impl ArtifactBundle {
    /// Assemble a bundle from already-built parts, checking they agree.
    pub fn from_parts(
        manifest: FeatureManifest,
        scaler: StandardScaler,
        predictors: Vec<Arc<dyn StagePredictor>>,
    ) -> Result<Self, ArtifactError> {
        scaler.check_manifest(&manifest)?;
        if predictors.is_empty() {
            return Err(ArtifactError::NoPredictors);
        }
        Ok(Self {
            manifest: Arc::new(manifest),
            scaler: Arc::new(scaler),
            selector: Arc::new(FallbackSelector::new(predictors)),
        })
    }

    pub fn load(config: &ArtifactsConfig) -> Result<Self, ArtifactError> {
        let manifest_path = config.manifest_path();
        let published: PublishedManifest = read_json(&manifest_path)?;
        let manifest = FeatureManifest::v1()?.adopt(&published)?;
        info!(
            path = %manifest_path.display(),
            version = manifest.version(),
            features = manifest.len(),
            "Feature manifest verified"
        );

        let scaler_path = config.scaler_path();
        let scaler: StandardScaler = read_json(&scaler_path)?;
        scaler.validate()?;
        scaler.check_manifest(&manifest)?;
        let scaler = Arc::new(scaler);
        info!(path = %scaler_path.display(), "Scaler loaded");

        let mut predictors: Vec<Arc<dyn StagePredictor>> = Vec::with_capacity(config.models.len() + 1);
        for model in &config.models {
            predictors.push(load_model(&config.dir, model, &manifest)?);
        }
        if config.rule_based_fallback {
            predictors.push(Arc::new(RuleBasedPredictor::for_manifest(&manifest)));
        }
        if predictors.is_empty() {
            return Err(ArtifactError::NoPredictors);
        }

        let selector = FallbackSelector::new(predictors);
        info!(predictors = ?selector.model_ids().collect::<Vec<_>>(), "Fallback order");

        Ok(Self {
            manifest: Arc::new(manifest),
            scaler,
            selector: Arc::new(selector),
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = std::fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_model(
    dir: &Path,
    config: &ModelConfig,
    manifest: &FeatureManifest,
) -> Result<Arc<dyn StagePredictor>, ArtifactError> {
    let path = dir.join(&config.file);
    let unloaded = |reason: UnavailableReason| -> Arc<dyn StagePredictor> {
        warn!(model_id = %config.id, path = %path.display(), %reason, "Model not loaded");
        Arc::new(UnloadedPredictor::new(config.id.clone(), config.kind, reason))
    };

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Ok(unloaded(UnavailableReason::MissingArtifact {
                detail: format!("{}: {e}", path.display()),
            }))
        }
    };
    let digest = encode_hex(&Sha256::digest(&bytes));

    let parsed = match config.kind {
        PredictorKind::GradientBoostedTrees => parse_model::<GradientBoostedTrees>(&bytes, &config.id),
        PredictorKind::RandomForest => parse_model::<RandomForest>(&bytes, &config.id),
        PredictorKind::SoftmaxRegression => parse_model::<SoftmaxRegression>(&bytes, &config.id),
        PredictorKind::RuleBased => Err("rule_based has no model file".to_string()),
    };

    let (predictor, metadata) = match parsed {
        Ok(loaded) => loaded,
        Err(detail) => return Ok(unloaded(UnavailableReason::CorruptedArtifact { detail })),
    };

    if metadata.manifest_version != manifest.version() || metadata.n_features != manifest.len() {
        return Err(ArtifactError::ModelManifest {
            model_id: config.id.clone(),
            expected: format!("{} ({} features)", manifest.version(), manifest.len()),
            found: format!("{} ({} features)", metadata.manifest_version, metadata.n_features),
        });
    }

    info!(
        model_id = %config.id,
        kind = %config.kind,
        version = %metadata.version,
        sha256 = %digest,
        "Model loaded"
    );
    Ok(predictor)
}

/// A predictor persisted as a JSON artifact.
trait ModelArtifact: StagePredictor + DeserializeOwned + 'static {
    fn metadata_mut(&mut self) -> &mut ModelMetadata;
    fn check(&self) -> Result<(), String>;
}

macro_rules! model_artifact {
    ($($ty:ty),*) => {$(
        impl ModelArtifact for $ty {
            fn metadata_mut(&mut self) -> &mut ModelMetadata {
                &mut self.metadata
            }

            fn check(&self) -> Result<(), String> {
                self.validate()
            }
        }
    )*};
}

model_artifact!(GradientBoostedTrees, RandomForest, SoftmaxRegression);

/// Deserialize and validate one model; the configured id replaces whatever
/// id the artifact carries.
fn parse_model<M: ModelArtifact>(
    bytes: &[u8],
    id: &str,
) -> Result<(Arc<dyn StagePredictor>, ModelMetadata), String> {
    let mut model: M = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    model.check()?;
    let metadata = model.metadata_mut();
    metadata.model_id = id.to_string();
    let metadata = metadata.clone();
    Ok((Arc::new(model), metadata))
}
