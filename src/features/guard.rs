//! Leakage guard
//!
//! The allow-list below decides, per raw signal, how recent a value may be
//! when it feeds a feature. It is applied when a manifest is *defined*: a
//! feature that fails the check can never be part of a manifest, so nothing
//! at inference time has to filter anything.
//!
//! Three kinds of signal are kept out:
//! - the stage label at an offset shorter than the forecast horizon (and, for
//!   v1, longer than 24h: multi-week stage persistence turns long label lags
//!   into a copy of the answer);
//! - realized supply/demand measured at the anchor hour itself;
//! - operational responses that are emitted *because* curtailment happens.
//!
//! New signals are unlisted (and therefore rejected) until someone adds an
//! entry here after checking them against the same three rules.

use serde::Serialize;

use super::manifest::FeatureKind;
use crate::domain::{Signal, SignalClass, HORIZON_HOURS};

/// Permission for one raw signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllowEntry {
    pub signal: Signal,
    pub class: SignalClass,
    /// Smallest look-back (hours before the anchor) a feature may read.
    /// `None` means the signal may never be used.
    pub earliest_offset_hours: Option<u32>,
    /// Largest look-back a feature may read, if bounded
    pub latest_offset_hours: Option<u32>,
    pub rationale: &'static str,
}

impl AllowEntry {
    const fn new(
        signal: Signal,
        class: SignalClass,
        earliest: Option<u32>,
        latest: Option<u32>,
        rationale: &'static str,
    ) -> Self {
        Self {
            signal,
            class,
            earliest_offset_hours: earliest,
            latest_offset_hours: latest,
            rationale,
        }
    }
}

const LABEL_MIN_OFFSET: u32 = HORIZON_HOURS as u32;
const LABEL_MAX_OFFSET: u32 = 24;

/// The v1 allow-list.
pub const ALLOW_LIST: &[AllowEntry] = &[
    AllowEntry::new(
        Signal::TemperatureC,
        SignalClass::Exogenous,
        Some(0),
        None,
        "weather observation, independent of grid operation",
    ),
    AllowEntry::new(
        Signal::HumidityPct,
        SignalClass::Exogenous,
        Some(0),
        None,
        "weather observation, independent of grid operation",
    ),
    AllowEntry::new(
        Signal::WindSpeedMs,
        SignalClass::Exogenous,
        Some(0),
        None,
        "weather observation, independent of grid operation",
    ),
    AllowEntry::new(
        Signal::DemandForecastMw,
        SignalClass::Published,
        Some(0),
        None,
        "day-ahead forecast, published before the anchor hour",
    ),
    AllowEntry::new(
        Signal::PlannedOutageMw,
        SignalClass::Published,
        Some(0),
        None,
        "maintenance schedule, published before the anchor hour",
    ),
    AllowEntry::new(
        Signal::CapacityLossMw,
        SignalClass::Measurement,
        Some(1),
        None,
        "realized breakdown losses; the anchor-hour value is the supply side of the stage",
    ),
    AllowEntry::new(
        Signal::ThermalGenerationMw,
        SignalClass::Measurement,
        Some(1),
        None,
        "realized supply; only completed hours are known",
    ),
    AllowEntry::new(
        Signal::RenewableGenerationMw,
        SignalClass::Measurement,
        Some(1),
        None,
        "realized supply; only completed hours are known",
    ),
    AllowEntry::new(
        Signal::ResidualDemandMw,
        SignalClass::Measurement,
        Some(1),
        None,
        "realized demand; only completed hours are known",
    ),
    AllowEntry::new(
        Signal::EmergencyDispatchMw,
        SignalClass::OperationalResponse,
        None,
        None,
        "peaking plant is dispatched in response to a shortfall",
    ),
    AllowEntry::new(
        Signal::InterruptibleLoadMw,
        SignalClass::OperationalResponse,
        None,
        None,
        "interruptible load is called in response to a shortfall",
    ),
    AllowEntry::new(
        Signal::StageLabel,
        SignalClass::Label,
        Some(LABEL_MIN_OFFSET),
        Some(LABEL_MAX_OFFSET),
        "target; usable only beyond the horizon and before persistence dominates",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeakageViolation {
    #[error("feature {feature}: signal {signal} is not on the allow-list")]
    Unlisted { feature: String, signal: Signal },
    #[error("feature {feature}: {signal} is an operational response to curtailment")]
    OperationalResponse { feature: String, signal: Signal },
    #[error("feature {feature}: stage label at {offset}h is inside the {horizon}h horizon")]
    LabelInsideHorizon {
        feature: String,
        offset: u32,
        horizon: u32,
    },
    #[error("feature {feature}: stage label at {offset}h exceeds the {latest}h persistence bound")]
    LabelPersistence {
        feature: String,
        offset: u32,
        latest: u32,
    },
    #[error("feature {feature}: {signal} read at {offset}h, earliest permitted is {earliest}h")]
    Contemporaneous {
        feature: String,
        signal: Signal,
        offset: u32,
        earliest: u32,
    },
}

/// Applies [`ALLOW_LIST`] to feature definitions.
#[derive(Debug, Clone, Copy)]
pub struct LeakageGuard {
    entries: &'static [AllowEntry],
}

impl Default for LeakageGuard {
    fn default() -> Self {
        Self::standard()
    }
}

impl LeakageGuard {
    pub fn standard() -> Self {
        Self {
            entries: ALLOW_LIST,
        }
    }

    pub fn entries(&self) -> &'static [AllowEntry] {
        self.entries
    }

    pub fn entry(&self, signal: Signal) -> Option<&'static AllowEntry> {
        self.entries.iter().find(|e| e.signal == signal)
    }

    /// Check one feature definition. Features without a raw signal (calendar
    /// encodings, interactions of already-admitted features) always pass.
    pub fn check(&self, feature: &str, kind: &FeatureKind) -> Result<(), LeakageViolation> {
        let (Some(signal), Some((nearest, farthest))) = (kind.signal(), kind.offset_range()) else {
            return Ok(());
        };

        let entry = self.entry(signal).ok_or_else(|| LeakageViolation::Unlisted {
            feature: feature.to_string(),
            signal,
        })?;

        let Some(earliest) = entry.earliest_offset_hours else {
            return Err(LeakageViolation::OperationalResponse {
                feature: feature.to_string(),
                signal,
            });
        };

        if nearest < earliest {
            return Err(if entry.class == SignalClass::Label {
                LeakageViolation::LabelInsideHorizon {
                    feature: feature.to_string(),
                    offset: nearest,
                    horizon: earliest,
                }
            } else {
                LeakageViolation::Contemporaneous {
                    feature: feature.to_string(),
                    signal,
                    offset: nearest,
                    earliest,
                }
            });
        }

        if let Some(latest) = entry.latest_offset_hours {
            if farthest > latest {
                return Err(LeakageViolation::LabelPersistence {
                    feature: feature.to_string(),
                    offset: farthest,
                    latest,
                });
            }
        }

        Ok(())
    }
}
