#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use loadshed_forecast::domain::{Observation, Signal};
use loadshed_forecast::features::FeatureManifest;
use loadshed_forecast::history::HistoryBuffer;
use loadshed_forecast::ml::models::{PredictorKind, RuleBasedPredictor, UnloadedPredictor};
use loadshed_forecast::ml::{
    ArtifactBundle, NormalizedVector, PredictorOutcome, StageDistribution, StagePredictor, StandardScaler,
    UnavailableReason,
};
use loadshed_forecast::StageForecaster;

/// Hour 0 of every scenario.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap()
}

pub fn hour(h: i64) -> DateTime<Utc> {
    start() + Duration::hours(h)
}

/// Always answers with all mass on one stage.
pub struct FixedPredictor {
    pub id: &'static str,
    pub stage: usize,
}

impl StagePredictor for FixedPredictor {
    fn id(&self) -> &str {
        self.id
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::SoftmaxRegression
    }

    fn predict(&self, _input: &NormalizedVector) -> PredictorOutcome {
        let mut probs = [0.0; 9];
        probs[self.stage] = 1.0;
        StageDistribution::new(&probs).into()
    }
}

pub fn fixed(id: &'static str, stage: usize) -> Arc<dyn StagePredictor> {
    Arc::new(FixedPredictor { id, stage })
}

pub fn unloaded(id: &str) -> Arc<dyn StagePredictor> {
    Arc::new(UnloadedPredictor::new(
        id,
        PredictorKind::GradientBoostedTrees,
        UnavailableReason::CorruptedArtifact {
            detail: format!("{id}.json: truncated"),
        },
    ))
}

pub fn rule_based() -> Arc<dyn StagePredictor> {
    let manifest = FeatureManifest::v1().unwrap();
    Arc::new(RuleBasedPredictor::for_manifest(&manifest))
}

pub fn forecaster(predictors: Vec<Arc<dyn StagePredictor>>) -> StageForecaster {
    let manifest = FeatureManifest::v1().unwrap();
    let scaler = StandardScaler::identity(&manifest);
    let bundle = ArtifactBundle::from_parts(manifest, scaler, predictors).unwrap();
    StageForecaster::new(Arc::new(HistoryBuffer::default()), bundle)
}

/// An hour with every measurement and exogenous signal present.
pub fn full_observation(h: i64, capacity_loss: f64) -> Observation {
    Observation::new(hour(h))
        .with_signal(Signal::CapacityLossMw, capacity_loss)
        .with_signal(Signal::ThermalGenerationMw, 21000.0 + h as f64)
        .with_signal(Signal::RenewableGenerationMw, 2500.0)
        .with_signal(Signal::PlannedOutageMw, 4800.0)
        .with_signal(Signal::TemperatureC, 22.0)
        .with_signal(Signal::HumidityPct, 55.0)
        .with_signal(Signal::WindSpeedMs, 6.0)
        .with_signal(Signal::DemandForecastMw, 28000.0)
}
