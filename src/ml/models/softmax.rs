//! Multinomial logistic regression

use serde::{Deserialize, Serialize};

use super::{check_input, PredictorKind, PredictorOutcome, StageDistribution, StagePredictor};
use crate::domain::Stage;
use crate::ml::{ModelMetadata, NormalizedVector};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    pub metadata: ModelMetadata,
    /// One coefficient row per stage
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl SoftmaxRegression {
    pub fn new(coefficients: Vec<Vec<f64>>, intercepts: Vec<f64>, metadata: ModelMetadata) -> Self {
        Self {
            metadata,
            coefficients,
            intercepts,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.coefficients.len() != Stage::COUNT || self.intercepts.len() != Stage::COUNT {
            return Err(format!(
                "{} coefficient rows and {} intercepts, expected {}",
                self.coefficients.len(),
                self.intercepts.len(),
                Stage::COUNT
            ));
        }
        for (class, row) in self.coefficients.iter().enumerate() {
            if row.len() != self.metadata.n_features {
                return Err(format!(
                    "class {class}: {} coefficients, expected {}",
                    row.len(),
                    self.metadata.n_features
                ));
            }
        }
        if self
            .coefficients
            .iter()
            .flatten()
            .chain(&self.intercepts)
            .any(|v| !v.is_finite())
        {
            return Err("non-finite parameter".to_string());
        }
        Ok(())
    }
}

impl StagePredictor for SoftmaxRegression {
    fn id(&self) -> &str {
        &self.metadata.model_id
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::SoftmaxRegression
    }

    fn predict(&self, input: &NormalizedVector) -> PredictorOutcome {
        check_input(&self.metadata, input)
            .and_then(|()| {
                let scores: Vec<f64> = self
                    .coefficients
                    .iter()
                    .zip(&self.intercepts)
                    .map(|(row, b)| row.iter().zip(input.values()).map(|(c, x)| c * x).sum::<f64>() + b)
                    .collect();
                StageDistribution::from_scores(&scores)
            })
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::UnavailableReason;

    fn model() -> SoftmaxRegression {
        let mut coefficients = vec![vec![0.0, 0.0]; Stage::COUNT];
        coefficients[0] = vec![-2.0, 0.0];
        coefficients[5] = vec![2.0, 0.0];
        SoftmaxRegression::new(coefficients, vec![0.0; Stage::COUNT], ModelMetadata::ad_hoc("lr", "v", 2))
    }

    #[test]
    fn test_softmax_regression_predict() {
        let m = model();
        m.validate().unwrap();

        let PredictorOutcome::Distribution(d) = m.predict(&NormalizedVector::new("v", vec![3.0, 1.0])) else {
            panic!("expected distribution");
        };
        assert_eq!(d.most_likely().0.value(), 5);

        let PredictorOutcome::Distribution(d) = m.predict(&NormalizedVector::new("v", vec![-3.0, 1.0])) else {
            panic!("expected distribution");
        };
        assert_eq!(d.most_likely().0.value(), 0);
    }

    #[test]
    fn test_non_finite_input_is_unavailable() {
        let m = model();
        assert!(matches!(
            m.predict(&NormalizedVector::new("v", vec![f64::NAN, 0.0])),
            PredictorOutcome::Unavailable(UnavailableReason::InvalidOutput { .. })
        ));
    }

    #[test]
    fn test_validate_shapes() {
        let mut m = model();
        m.coefficients[3].push(1.0);
        assert!(m.validate().is_err());

        let mut m = model();
        m.intercepts.pop();
        assert!(m.validate().is_err());
    }
}
