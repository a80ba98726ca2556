use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Raw signal carried by an [`Observation`](super::Observation).
///
/// The string form is the wire name used by the ingestion job and in the
/// feature manifest (`capacity_loss_mw_lag_24h` etc.).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Signal {
    /// Unplanned generation capacity lost to breakdowns (MW)
    CapacityLossMw,
    /// Scheduled maintenance outages (MW), published ahead of time
    PlannedOutageMw,
    /// Realized thermal generation (MW)
    ThermalGenerationMw,
    /// Realized wind + solar generation (MW)
    RenewableGenerationMw,
    /// Realized residual demand (MW)
    ResidualDemandMw,
    /// Published demand forecast (MW)
    DemandForecastMw,
    /// Air temperature (°C)
    TemperatureC,
    /// Relative humidity (%)
    HumidityPct,
    /// Wind speed (m/s)
    WindSpeedMs,
    /// Open-cycle gas turbine / diesel dispatch (MW)
    EmergencyDispatchMw,
    /// Load removed under interruptible supply agreements (MW)
    InterruptibleLoadMw,
    /// Realized curtailment stage of the hour
    StageLabel,
}

/// How a signal relates to the stage being forecast.
///
/// This is the vocabulary of the leakage allow-list: every signal has exactly
/// one class and the class decides the earliest offset at which the signal may
/// feed a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SignalClass {
    /// Weather, known independently of the grid state
    Exogenous,
    /// Forecast or schedule published before the hour it describes
    Published,
    /// Direct measurement of supply or demand; only past values are known
    Measurement,
    /// Emitted as a reaction to curtailment
    OperationalResponse,
    /// The target itself
    Label,
}

impl Signal {
    pub fn class(&self) -> SignalClass {
        match self {
            Self::TemperatureC | Self::HumidityPct | Self::WindSpeedMs => SignalClass::Exogenous,
            Self::DemandForecastMw | Self::PlannedOutageMw => SignalClass::Published,
            Self::CapacityLossMw
            | Self::ThermalGenerationMw
            | Self::RenewableGenerationMw
            | Self::ResidualDemandMw => SignalClass::Measurement,
            Self::EmergencyDispatchMw | Self::InterruptibleLoadMw => {
                SignalClass::OperationalResponse
            }
            Self::StageLabel => SignalClass::Label,
        }
    }

    /// Physically plausible `(min, max)` for a value of this signal.
    pub fn bounds(&self) -> (f64, f64) {
        const GRID_MW: f64 = 1_000_000.0;
        match self {
            Self::TemperatureC => (-90.0, 60.0),
            Self::HumidityPct => (0.0, 100.0),
            Self::WindSpeedMs => (0.0, 120.0),
            Self::ResidualDemandMw => (-GRID_MW, GRID_MW),
            Self::StageLabel => (0.0, 8.0),
            _ => (0.0, GRID_MW),
        }
    }

    pub fn admits(&self, value: f64) -> bool {
        let (min, max) = self.bounds();
        (min..=max).contains(&value)
    }
}
