//! Tree ensemble inference
//!
//! Trees are stored as flat node arrays. Children always sit after their
//! parent, which load-time validation checks; traversal therefore always
//! terminates.

use serde::{Deserialize, Serialize};

use super::{check_input, PredictorKind, PredictorOutcome, StageDistribution, StagePredictor, UnavailableReason};
use crate::domain::Stage;
use crate::ml::{ModelMetadata, NormalizedVector};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode<L> {
    /// `x[feature] < threshold` goes left, everything else right
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: L },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionTree<L> {
    nodes: Vec<TreeNode<L>>,
}

impl<L> DecisionTree<L> {
    pub fn new(nodes: Vec<TreeNode<L>>) -> Self {
        Self { nodes }
    }

    pub fn validate(&self, n_features: usize, leaf_ok: impl Fn(&L) -> Result<(), String>) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty tree".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(format!("node {i}: feature {feature} out of range"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {i}: non-finite threshold"));
                    }
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(format!("node {i}: invalid child {child}"));
                        }
                    }
                }
                TreeNode::Leaf { value } => leaf_ok(value).map_err(|e| format!("node {i}: {e}"))?,
            }
        }
        Ok(())
    }

    /// Leaf reached by `x`. Only call on a validated tree.
    pub fn leaf(&self, x: &[f64]) -> &L {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if x[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// One boosted tree contributing to one class score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassTree {
    pub class: usize,
    pub tree: DecisionTree<f64>,
}

/// Multi-class gradient boosting (softprob objective).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub metadata: ModelMetadata,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<ClassTree>,
}

impl GradientBoostedTrees {
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("no trees".to_string());
        }
        for (t, ct) in self.trees.iter().enumerate() {
            if ct.class >= Stage::COUNT {
                return Err(format!("tree {t}: class {} out of range", ct.class));
            }
            ct.tree
                .validate(self.metadata.n_features, |v: &f64| {
                    if v.is_finite() {
                        Ok(())
                    } else {
                        Err("non-finite leaf".to_string())
                    }
                })
                .map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }

    fn distribution(&self, x: &[f64]) -> Result<StageDistribution, UnavailableReason> {
        let mut scores = [self.base_score; Stage::COUNT];
        for ct in &self.trees {
            scores[ct.class] += *ct.tree.leaf(x);
        }
        StageDistribution::from_scores(&scores)
    }
}

impl StagePredictor for GradientBoostedTrees {
    fn id(&self) -> &str {
        &self.metadata.model_id
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::GradientBoostedTrees
    }

    fn predict(&self, input: &NormalizedVector) -> PredictorOutcome {
        check_input(&self.metadata, input)
            .and_then(|()| self.distribution(input.values()))
            .into()
    }
}

/// Random forest classifier; each leaf holds a class distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub metadata: ModelMetadata,
    pub trees: Vec<DecisionTree<Vec<f64>>>,
}

impl RandomForest {
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("no trees".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.metadata.n_features, |leaf: &Vec<f64>| {
                StageDistribution::new(leaf)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }

    fn distribution(&self, x: &[f64]) -> Result<StageDistribution, UnavailableReason> {
        let mut sum = [0.0; Stage::COUNT];
        for tree in &self.trees {
            for (acc, p) in sum.iter_mut().zip(tree.leaf(x)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        let avg: Vec<f64> = sum.iter().map(|s| s / n).collect();
        StageDistribution::new(&avg)
    }
}

impl StagePredictor for RandomForest {
    fn id(&self) -> &str {
        &self.metadata.model_id
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::RandomForest
    }

    fn predict(&self, input: &NormalizedVector) -> PredictorOutcome {
        check_input(&self.metadata, input)
            .and_then(|()| self.distribution(input.values()))
            .into()
    }
}
