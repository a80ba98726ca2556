//! Model registry and fallback selection
//!
//! The predictor list is built once at start-up and handed to the selector;
//! order is preference order. Selection walks the list and stops at the
//! first predictor that produces a distribution.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::models::{PredictorKind, PredictorOutcome, StageDistribution, StagePredictor, UnavailableReason};
use super::NormalizedVector;
use crate::domain::Stage;

/// A predictor that was tried and declined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedModel {
    pub model_id: String,
    #[serde(flatten)]
    pub reason: UnavailableReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Answered {
        stage: Stage,
        confidence: f64,
        model_id: String,
        distribution: StageDistribution,
        /// Predictors tried before the one that answered
        skipped: Vec<SkippedModel>,
    },
    Exhausted { attempts: Vec<SkippedModel> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Loaded,
    Unavailable,
}

/// One row of the model status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub position: usize,
    pub model_id: String,
    pub kind: PredictorKind,
    pub state: LoadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

pub struct FallbackSelector {
    predictors: Vec<Arc<dyn StagePredictor>>,
}

impl FallbackSelector {
    pub fn new(predictors: Vec<Arc<dyn StagePredictor>>) -> Self {
        Self { predictors }
    }

    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.predictors.iter().map(|p| p.id())
    }

    pub fn select(&self, input: &NormalizedVector) -> Selection {
        let mut skipped = Vec::new();

        for predictor in &self.predictors {
            match predictor.predict(input) {
                PredictorOutcome::Distribution(distribution) => {
                    let (stage, confidence) = distribution.most_likely();
                    return Selection::Answered {
                        stage,
                        confidence,
                        model_id: predictor.id().to_string(),
                        distribution,
                        skipped,
                    };
                }
                PredictorOutcome::Unavailable(reason) => {
                    warn!(model_id = predictor.id(), %reason, "Predictor unavailable, trying next");
                    skipped.push(SkippedModel {
                        model_id: predictor.id().to_string(),
                        reason,
                    });
                }
            }
        }

        Selection::Exhausted { attempts: skipped }
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        self.predictors
            .iter()
            .enumerate()
            .map(|(position, p)| {
                let reason = p.load_failure().cloned();
                ModelStatus {
                    position,
                    model_id: p.id().to_string(),
                    kind: p.kind(),
                    state: if reason.is_some() {
                        LoadState::Unavailable
                    } else {
                        LoadState::Loaded
                    },
                    reason,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for FallbackSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSelector")
            .field("predictors", &self.model_ids().collect::<Vec<_>>())
            .finish()
    }
}
