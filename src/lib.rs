//! Load-shedding stage forecaster
//!
//! Turns an hourly stream of grid, weather and calendar signals into a
//! six-hour-ahead curtailment stage (0-8), through a leakage-guarded feature
//! manifest, a frozen scaler and an ordered fallback over trained models.

pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod features;
pub mod history;
pub mod ml;
pub mod telemetry;

pub use engine::{PredictionRequest, PredictionResult, PredictionWarning, StageForecaster};
pub use error::PredictionError;
