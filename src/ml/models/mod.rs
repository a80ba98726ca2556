//! Stage predictors
//!
//! Every predictor maps a normalized feature vector to a probability
//! distribution over the nine stages. A predictor that cannot answer
//! correctly (wrong manifest, wrong width, broken artifact, degenerate
//! output) says so with [`PredictorOutcome::Unavailable`] instead of
//! returning something plausible-looking.
//!
//! - [`GradientBoostedTrees`]: per-class boosted trees, softmax over summed scores
//! - [`RandomForest`]: trees with class-distribution leaves, averaged
//! - [`SoftmaxRegression`]: multinomial logistic regression
//! - [`RuleBasedPredictor`]: supply-deficit rule, the last resort
//! - [`UnloadedPredictor`]: placeholder for an artifact that failed to load

pub mod rules;
pub mod softmax;
pub mod trees;

pub use rules::{rule_stage, RuleBasedPredictor, RULE_BASED_ID};
pub use softmax::SoftmaxRegression;
pub use trees::{ClassTree, DecisionTree, GradientBoostedTrees, RandomForest, TreeNode};

use serde::{Deserialize, Serialize};
use strum::Display;

use super::scaler::NormalizedVector;
use super::ModelMetadata;
use crate::domain::Stage;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PredictorKind {
    GradientBoostedTrees,
    RandomForest,
    SoftmaxRegression,
    RuleBased,
}

/// Why a predictor declined to answer.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnavailableReason {
    #[error("trained on manifest {expected}, input is {found}")]
    ManifestVersion { expected: String, found: String },
    #[error("expected {expected} features, got {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("artifact missing: {detail}")]
    MissingArtifact { detail: String },
    #[error("artifact corrupted: {detail}")]
    CorruptedArtifact { detail: String },
    #[error("invalid output: {detail}")]
    InvalidOutput { detail: String },
}

/// Probabilities for stages 0..=8.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDistribution([f64; Stage::COUNT]);

impl StageDistribution {
    /// Accept a distribution only if it is one: nine finite, non-negative
    /// values summing to 1.
    pub fn new(probabilities: &[f64]) -> Result<Self, UnavailableReason> {
        let probs: [f64; Stage::COUNT] =
            probabilities
                .try_into()
                .map_err(|_| UnavailableReason::InvalidOutput {
                    detail: format!("{} classes, expected {}", probabilities.len(), Stage::COUNT),
                })?;

        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(UnavailableReason::InvalidOutput {
                detail: "probability is negative or not finite".to_string(),
            });
        }
        let sum: f64 = probs.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(UnavailableReason::InvalidOutput {
                detail: format!("probabilities sum to {sum}"),
            });
        }
        Ok(Self(probs))
    }

    /// Numerically stable softmax over raw class scores.
    pub fn from_scores(scores: &[f64]) -> Result<Self, UnavailableReason> {
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        let probs: Vec<f64> = exp.iter().map(|e| e / total).collect();
        Self::new(&probs)
    }

    pub fn probabilities(&self) -> &[f64; Stage::COUNT] {
        &self.0
    }

    pub fn probability(&self, stage: Stage) -> f64 {
        self.0[stage.index()]
    }

    /// Most probable stage and its probability. Ties go to the lower stage.
    pub fn most_likely(&self) -> (Stage, f64) {
        let mut best = Stage::MIN;
        for stage in Stage::all().skip(1) {
            if self.probability(stage) > self.probability(best) {
                best = stage;
            }
        }
        (best, self.probability(best))
    }
}

/// Result of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictorOutcome {
    Distribution(StageDistribution),
    Unavailable(UnavailableReason),
}

impl From<Result<StageDistribution, UnavailableReason>> for PredictorOutcome {
    fn from(result: Result<StageDistribution, UnavailableReason>) -> Self {
        match result {
            Ok(d) => Self::Distribution(d),
            Err(r) => Self::Unavailable(r),
        }
    }
}

/// A trained model served behind the fallback selector.
pub trait StagePredictor: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> PredictorKind;

    fn predict(&self, input: &NormalizedVector) -> PredictorOutcome;

    /// Reason the predictor can never answer, if it is known up front.
    fn load_failure(&self) -> Option<&UnavailableReason> {
        None
    }
}

/// Shape and version check shared by artifact-backed predictors.
pub(crate) fn check_input(meta: &ModelMetadata, input: &NormalizedVector) -> Result<(), UnavailableReason> {
    if input.manifest_version() != meta.manifest_version {
        return Err(UnavailableReason::ManifestVersion {
            expected: meta.manifest_version.clone(),
            found: input.manifest_version().to_string(),
        });
    }
    if input.len() != meta.n_features {
        return Err(UnavailableReason::ShapeMismatch {
            expected: meta.n_features,
            found: input.len(),
        });
    }
    Ok(())
}

/// Stands in for a configured model whose artifact could not be loaded, so
/// the registry keeps its slot and reports why it is skipped.
#[derive(Debug, Clone)]
pub struct UnloadedPredictor {
    id: String,
    kind: PredictorKind,
    reason: UnavailableReason,
}

impl UnloadedPredictor {
    pub fn new(id: impl Into<String>, kind: PredictorKind, reason: UnavailableReason) -> Self {
        Self {
            id: id.into(),
            kind,
            reason,
        }
    }
}

impl StagePredictor for UnloadedPredictor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PredictorKind {
        self.kind
    }

    fn predict(&self, _input: &NormalizedVector) -> PredictorOutcome {
        PredictorOutcome::Unavailable(self.reason.clone())
    }

    fn load_failure(&self) -> Option<&UnavailableReason> {
        Some(&self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_validation() {
        let mut p = vec![0.0; 9];
        p[3] = 1.0;
        assert!(StageDistribution::new(&p).is_ok());

        assert!(StageDistribution::new(&p[..8]).is_err());
        p[4] = 0.5;
        assert!(StageDistribution::new(&p).is_err());
        p[4] = f64::NAN;
        assert!(StageDistribution::new(&p).is_err());
    }

    #[test]
    fn test_most_likely_breaks_ties_low() {
        let mut p = vec![0.0; 9];
        p[2] = 0.4;
        p[5] = 0.4;
        p[7] = 0.2;
        let d = StageDistribution::new(&p).unwrap();
        assert_eq!(d.most_likely(), (Stage::new(2).unwrap(), 0.4));

        let uniform = StageDistribution::new(&[1.0 / 9.0; 9]).unwrap();
        assert_eq!(uniform.most_likely().0, Stage::MIN);
    }

    #[test]
    fn test_softmax_scores() {
        let d = StageDistribution::from_scores(&[0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let (stage, p) = d.most_likely();
        assert_eq!(stage.value(), 4);
        assert!(p > 0.4 && p < 0.5);

        // large scores do not overflow
        let big = StageDistribution::from_scores(&[1000.0; 9]).unwrap();
        assert!((big.probability(Stage::MAX) - 1.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_unloaded_predictor_always_unavailable() {
        let reason = UnavailableReason::MissingArtifact {
            detail: "models/xgb.json".to_string(),
        };
        let p = UnloadedPredictor::new("xgboost", PredictorKind::GradientBoostedTrees, reason.clone());
        assert_eq!(
            p.predict(&NormalizedVector::new("v", vec![])),
            PredictorOutcome::Unavailable(reason.clone())
        );
        assert_eq!(p.load_failure(), Some(&reason));
    }
}
