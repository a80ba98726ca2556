use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{Signal, Stage};

/// Identifier of a forecast location (municipality, supply area, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One hourly record of raw signals for a location.
///
/// The realized stage is only present for hours that have already happened;
/// it is never known for the anchor hour or later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    signals: BTreeMap<Signal, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
}

/// Reasons an observation is rejected before it reaches the history buffer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObservationError {
    #[error("timestamp {0} is not aligned to the hour")]
    UnalignedTimestamp(DateTime<Utc>),
    #[error("signal {signal} has non-finite value {value}")]
    NonFinite { signal: Signal, value: f64 },
    #[error("signal {signal} value {value} is outside {min}..={max}")]
    OutOfRange {
        signal: Signal,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("stage label must be supplied as the observation stage, not as a signal value")]
    StageInSignals,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            signals: BTreeMap::new(),
            stage: None,
        }
    }

    pub fn with_signal(mut self, signal: Signal, value: f64) -> Self {
        self.signals.insert(signal, value);
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    pub fn signals(&self) -> &BTreeMap<Signal, f64> {
        &self.signals
    }

    /// Value of a raw signal; the stage label is read from the stage field.
    pub fn value(&self, signal: Signal) -> Option<f64> {
        match signal {
            Signal::StageLabel => self.stage.map(|s| s.value() as f64),
            other => self.signals.get(&other).copied(),
        }
    }

    /// Check the invariants the ingestion job is expected to have established.
    pub fn validate(&self) -> Result<(), ObservationError> {
        if !is_hour_aligned(&self.timestamp) {
            return Err(ObservationError::UnalignedTimestamp(self.timestamp));
        }
        if self.signals.contains_key(&Signal::StageLabel) {
            return Err(ObservationError::StageInSignals);
        }
        for (signal, value) in &self.signals {
            if !value.is_finite() {
                return Err(ObservationError::NonFinite {
                    signal: *signal,
                    value: *value,
                });
            }
            if !signal.admits(*value) {
                let (min, max) = signal.bounds();
                return Err(ObservationError::OutOfRange {
                    signal: *signal,
                    value: *value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Copy of this observation with `overrides` taking precedence per signal.
    pub fn overlay(&self, overrides: &BTreeMap<Signal, f64>) -> Self {
        let mut merged = self.clone();
        for (signal, value) in overrides {
            merged.signals.insert(*signal, *value);
        }
        merged
    }
}

pub fn is_hour_aligned(ts: &DateTime<Utc>) -> bool {
    ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0
}
