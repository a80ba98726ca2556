//! Supply-deficit rule
//!
//! Last-resort predictor that needs no trained artifact. It reads raw
//! demand and last-hour supply from the unnormalized slots carried by the
//! input and maps the deficit ratio to a stage.

use super::{PredictorKind, PredictorOutcome, StageDistribution, StagePredictor, UnavailableReason};
use crate::domain::Stage;
use crate::features::FeatureManifest;
use crate::ml::NormalizedVector;

pub const RULE_BASED_ID: &str = "rule_based_fallback";

const DEMAND: &str = "demand_forecast_mw";
const THERMAL: &str = "thermal_generation_mw_lag_1h";
const RENEWABLE: &str = "renewable_generation_mw_lag_1h";
const PEAK: &str = "is_peak_hour";

const PEAK_MULTIPLIER: f64 = 1.3;

/// `(upper bound on adjusted ratio, stage, confidence)`
const BANDS: [(f64, u8, f64); 5] = [
    (0.02, 0, 0.85),
    (0.05, 1, 0.75),
    (0.08, 2, 0.70),
    (0.12, 3, 0.65),
    (0.16, 4, 0.60),
];
const SEVERE_CONFIDENCE: f64 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slots {
    demand: usize,
    thermal: usize,
    renewable: usize,
    peak: usize,
}

#[derive(Debug, Clone)]
pub struct RuleBasedPredictor {
    manifest_version: String,
    width: usize,
    slots: Result<Slots, UnavailableReason>,
}

impl RuleBasedPredictor {
    pub fn for_manifest(manifest: &FeatureManifest) -> Self {
        let slot = |name: &str| {
            manifest
                .position(name)
                .ok_or_else(|| UnavailableReason::CorruptedArtifact {
                    detail: format!("manifest {} has no {name} slot", manifest.version()),
                })
        };
        let slots = slot(DEMAND).and_then(|demand| {
            Ok(Slots {
                demand,
                thermal: slot(THERMAL)?,
                renewable: slot(RENEWABLE)?,
                peak: slot(PEAK)?,
            })
        });

        Self {
            manifest_version: manifest.version().to_string(),
            width: manifest.len(),
            slots,
        }
    }

    fn slot_value(raw: &[f64], index: usize) -> Result<f64, UnavailableReason> {
        raw.get(index)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| UnavailableReason::InvalidOutput {
                detail: format!("slot {index} has no finite raw value"),
            })
    }

    fn distribution(&self, input: &NormalizedVector) -> Result<StageDistribution, UnavailableReason> {
        if input.manifest_version() != self.manifest_version {
            return Err(UnavailableReason::ManifestVersion {
                expected: self.manifest_version.clone(),
                found: input.manifest_version().to_string(),
            });
        }
        if input.len() != self.width {
            return Err(UnavailableReason::ShapeMismatch {
                expected: self.width,
                found: input.len(),
            });
        }
        let slots = self.slots.clone()?;
        let raw = input.raw().ok_or_else(|| UnavailableReason::InvalidOutput {
            detail: "input carries no raw slot values".to_string(),
        })?;

        let demand = Self::slot_value(raw, slots.demand)?;
        let supply = Self::slot_value(raw, slots.thermal)? + Self::slot_value(raw, slots.renewable)?;
        let peak = Self::slot_value(raw, slots.peak)? >= 0.5;

        let (stage, confidence) = rule_stage(demand, supply, peak);
        spread(stage, confidence)
    }
}

/// Stage and confidence for a demand/supply pair.
pub fn rule_stage(demand_mw: f64, supply_mw: f64, peak: bool) -> (Stage, f64) {
    let deficit = (demand_mw - supply_mw).max(0.0);
    let ratio = if demand_mw > 0.0 { deficit / demand_mw } else { 0.0 };
    let adjusted = if peak { ratio * PEAK_MULTIPLIER } else { ratio };

    for (bound, stage, confidence) in BANDS {
        if adjusted < bound {
            return (Stage::saturating(stage as i64), confidence);
        }
    }
    (Stage::saturating((adjusted * 25.0) as i64), SEVERE_CONFIDENCE)
}

/// `confidence` on `stage`, the remainder shared evenly by the others.
fn spread(stage: Stage, confidence: f64) -> Result<StageDistribution, UnavailableReason> {
    let rest = (1.0 - confidence) / (Stage::COUNT - 1) as f64;
    let probs: Vec<f64> = Stage::all()
        .map(|s| if s == stage { confidence } else { rest })
        .collect();
    StageDistribution::new(&probs)
}

impl StagePredictor for RuleBasedPredictor {
    fn id(&self) -> &str {
        RULE_BASED_ID
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::RuleBased
    }

    fn predict(&self, input: &NormalizedVector) -> PredictorOutcome {
        self.distribution(input).into()
    }

    fn load_failure(&self) -> Option<&UnavailableReason> {
        self.slots.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(30000.0, 30000.0, false, 0, 0.85)]
    #[case(30000.0, 29000.0, false, 1, 0.75)]
    #[case(30000.0, 28000.0, false, 2, 0.70)]
    #[case(30000.0, 28000.0, true, 3, 0.65)]
    #[case(30000.0, 26000.0, false, 4, 0.60)]
    #[case(30000.0, 24000.0, false, 5, 0.55)]
    #[case(30000.0, 0.0, true, 8, 0.55)]
    #[case(0.0, 1000.0, true, 0, 0.85)]
    fn test_rule_stage(
        #[case] demand: f64,
        #[case] supply: f64,
        #[case] peak: bool,
        #[case] stage: u8,
        #[case] confidence: f64,
    ) {
        let (s, c) = rule_stage(demand, supply, peak);
        assert_eq!(s.value(), stage);
        assert_eq!(c, confidence);
    }

    fn predictor() -> (FeatureManifest, RuleBasedPredictor) {
        let manifest = FeatureManifest::v1().unwrap();
        let p = RuleBasedPredictor::for_manifest(&manifest);
        (manifest, p)
    }

    fn outcome_stage(outcome: PredictorOutcome) -> (u8, f64) {
        let PredictorOutcome::Distribution(d) = &outcome else {
            panic!("expected distribution, got {outcome:?}");
        };
        let total: f64 = d.probabilities().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        let (stage, confidence) = d.most_likely();
        (stage.value(), confidence)
    }

    #[test]
    fn test_reads_raw_values_not_normalized() {
        let (manifest, p) = predictor();
        let n = manifest.len();

        // raw demand 30000, supply 24000 + 0, off-peak: ratio 0.2
        let mut raw = vec![0.0; n];
        raw[manifest.position(DEMAND).unwrap()] = 30000.0;
        raw[manifest.position(THERMAL).unwrap()] = 24000.0;
        let input = NormalizedVector::with_raw(manifest.version(), vec![0.0; n], raw);

        assert_eq!(outcome_stage(p.predict(&input)), (5, 0.55));
    }

    #[test]
    fn test_constant_demand_column_still_read_raw() {
        use crate::domain::{Observation, Signal};
        use crate::features::FeatureTransformer;
        use crate::ml::StandardScaler;
        use chrono::{Duration, TimeZone, Utc};
        use std::sync::Arc;

        let manifest = Arc::new(FeatureManifest::v1().unwrap());
        let anchor = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let current = Observation::new(anchor).with_signal(Signal::DemandForecastMw, 30000.0);
        let window = vec![Observation::new(anchor - Duration::hours(1))
            .with_signal(Signal::ThermalGenerationMw, 24000.0)
            .with_signal(Signal::RenewableGenerationMw, 0.0)];
        let features = FeatureTransformer::new(Arc::clone(&manifest))
            .transform(&current, &window, anchor)
            .unwrap();

        // demand was constant during fitting: zero scale, unrelated mean
        let n = manifest.len();
        let demand = manifest.position(DEMAND).unwrap();
        let mut mean = vec![0.0; n];
        let mut scale = vec![1.0; n];
        mean[demand] = 99999.0;
        scale[demand] = 0.0;
        let scaler = StandardScaler::new(manifest.version(), mean, scale).unwrap();
        let input = scaler.transform(&features).unwrap();
        assert_eq!(input.values()[demand], 0.0);

        let p = RuleBasedPredictor::for_manifest(&manifest);
        assert_eq!(outcome_stage(p.predict(&input)), (5, 0.55));
    }

    #[test]
    fn test_missing_raw_values_is_unavailable() {
        let (manifest, p) = predictor();
        assert!(matches!(
            p.predict(&NormalizedVector::new(manifest.version(), vec![0.0; manifest.len()])),
            PredictorOutcome::Unavailable(UnavailableReason::InvalidOutput { .. })
        ));
    }

    #[test]
    fn test_wrong_manifest_is_unavailable() {
        let (manifest, p) = predictor();
        assert!(p.load_failure().is_none());
        assert!(matches!(
            p.predict(&NormalizedVector::new("lsf-v0", vec![0.0; manifest.len()])),
            PredictorOutcome::Unavailable(UnavailableReason::ManifestVersion { .. })
        ));
    }
}
