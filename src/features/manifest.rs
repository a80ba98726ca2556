//! Feature manifest
//!
//! The manifest is the single source of truth for the feature vector layout:
//! slot order, slot names, what each slot computes and the training-time
//! default used when history cannot supply a value. Training publishes the
//! names and version it fitted against; inference refuses to run if they
//! differ from the manifest compiled in here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;

use super::guard::{LeakageGuard, LeakageViolation};
use crate::domain::Signal;

pub const V1_VERSION: &str = "lsf-v1-54";
pub const V1_WIDTH: usize = 54;

/// Calendar encodings computed from the anchor timestamp alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CalendarFeature {
    HourSin,
    HourCos,
    DayOfWeekSin,
    DayOfWeekCos,
    MonthSin,
    MonthCos,
    DayOfMonthSin,
    DayOfMonthCos,
    WeekOfYearSin,
    WeekOfYearCos,
    IsPeakHour,
    IsWeekend,
}

/// What a feature slot computes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureKind {
    /// Value at the anchor hour (current observation plus overrides)
    Current { signal: Signal },
    /// Value `hours` before the anchor
    Lag { signal: Signal, hours: u32 },
    /// Mean over the `hours` slots preceding the anchor
    RollingMean { signal: Signal, hours: u32 },
    /// Population standard deviation over the `hours` slots preceding the anchor
    RollingStd { signal: Signal, hours: u32 },
    /// `value(anchor - 1h) - value(anchor - 2h)`
    Difference { signal: Signal },
    Calendar { feature: CalendarFeature },
    /// `left * right * scale`; operands are slot indices defined earlier
    Product { left: usize, right: usize, scale: f64 },
    /// `numerator / max(sum(denominator), floor)`
    Ratio {
        numerator: usize,
        denominator: Vec<usize>,
        floor: f64,
    },
}

impl FeatureKind {
    pub fn signal(&self) -> Option<Signal> {
        match self {
            Self::Current { signal }
            | Self::Lag { signal, .. }
            | Self::RollingMean { signal, .. }
            | Self::RollingStd { signal, .. }
            | Self::Difference { signal } => Some(*signal),
            Self::Calendar { .. } | Self::Product { .. } | Self::Ratio { .. } => None,
        }
    }

    /// Nearest and farthest hour before the anchor this feature reads.
    pub fn offset_range(&self) -> Option<(u32, u32)> {
        match self {
            Self::Current { .. } => Some((0, 0)),
            Self::Lag { hours, .. } => Some((*hours, *hours)),
            Self::RollingMean { hours, .. } | Self::RollingStd { hours, .. } => Some((1, *hours)),
            Self::Difference { .. } => Some((1, 2)),
            Self::Calendar { .. } | Self::Product { .. } | Self::Ratio { .. } => None,
        }
    }

    /// Whether the slot depends on the history window.
    pub fn uses_history(&self) -> bool {
        matches!(
            self,
            Self::Lag { .. } | Self::RollingMean { .. } | Self::RollingStd { .. } | Self::Difference { .. }
        )
    }

    fn default_name(&self) -> Option<String> {
        match self {
            Self::Current { signal } => Some(signal.to_string()),
            Self::Lag { signal, hours } => Some(format!("{signal}_lag_{hours}h")),
            Self::RollingMean { signal, hours } => Some(format!("{signal}_roll_mean_{hours}h")),
            Self::RollingStd { signal, hours } => Some(format!("{signal}_roll_std_{hours}h")),
            Self::Difference { signal } => Some(format!("{signal}_diff_1h")),
            Self::Calendar { feature } => Some(feature.to_string()),
            Self::Product { .. } | Self::Ratio { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDefinition {
    pub name: String,
    pub kind: FeatureKind,
    /// Training-time default used when no value can be derived
    pub default: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ManifestError {
    #[error("feature manifest mismatch (expected {expected}, found {found}): {detail}")]
    FeatureManifestMismatch {
        expected: String,
        found: String,
        detail: String,
    },
    #[error(transparent)]
    Leakage(#[from] LeakageViolation),
    #[error("duplicate feature name {0}")]
    DuplicateName(String),
    #[error("feature {feature} references {operand}, which is not defined before it")]
    UnknownOperand { feature: String, operand: String },
    #[error("feature kind {0:?} needs an explicit name")]
    Unnamed(FeatureKind),
}

/// Manifest as published next to trained artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedManifest {
    pub version: String,
    pub features: Vec<String>,
    /// Per-slot training defaults; when present they replace the built-in ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<Vec<f64>>,
}

/// Ordered, versioned feature layout.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureManifest {
    version: String,
    definitions: Vec<FeatureDefinition>,
    index: HashMap<String, usize>,
}

impl FeatureManifest {
    pub fn builder(version: impl Into<String>) -> ManifestBuilder {
        ManifestBuilder::new(version)
    }

    /// The production layout: 54 slots.
    pub fn v1() -> Result<Self, ManifestError> {
        use CalendarFeature::*;
        use Signal::*;

        let mut b = Self::builder(V1_VERSION);

        // lags
        for (signal, default) in [
            (CapacityLossMw, 15_000.0),
            (ThermalGenerationMw, 22_000.0),
            (RenewableGenerationMw, 3_000.0),
        ] {
            for hours in [1, 6, 24, 168] {
                b.feature(FeatureKind::Lag { signal, hours }, default)?;
            }
        }

        // rolling means
        for (signal, default) in [
            (CapacityLossMw, 15_000.0),
            (ThermalGenerationMw, 22_000.0),
            (RenewableGenerationMw, 3_000.0),
        ] {
            for hours in [3, 6, 12, 24] {
                b.feature(FeatureKind::RollingMean { signal, hours }, default)?;
            }
        }

        b.feature(FeatureKind::RollingStd { signal: ThermalGenerationMw, hours: 24 }, 800.0)?
            .feature(FeatureKind::RollingStd { signal: RenewableGenerationMw, hours: 24 }, 600.0)?;

        // volatility of capacity-loss type signals
        for (signal, std_default) in [(CapacityLossMw, 500.0), (PlannedOutageMw, 150.0)] {
            b.feature(FeatureKind::Difference { signal }, 0.0)?
                .feature(FeatureKind::RollingStd { signal, hours: 6 }, std_default)?
                .feature(FeatureKind::RollingStd { signal, hours: 24 }, std_default)?;
        }

        // anchor-hour exogenous values
        b.feature(FeatureKind::Current { signal: TemperatureC }, 25.0)?
            .feature(FeatureKind::Current { signal: HumidityPct }, 60.0)?
            .feature(FeatureKind::Current { signal: WindSpeedMs }, 10.0)?
            .feature(FeatureKind::Current { signal: DemandForecastMw }, 30_000.0)?
            .feature(FeatureKind::Current { signal: PlannedOutageMw }, 5_000.0)?;

        for feature in [
            HourSin, HourCos, DayOfWeekSin, DayOfWeekCos, MonthSin, MonthCos, DayOfMonthSin,
            DayOfMonthCos, WeekOfYearSin, WeekOfYearCos, IsPeakHour, IsWeekend,
        ] {
            b.feature(FeatureKind::Calendar { feature }, 0.0)?;
        }

        b.product("thermal_x_peak", "thermal_generation_mw_lag_1h", "is_peak_hour", 1.0)?
            .product("renewable_x_peak", "renewable_generation_mw_lag_1h", "is_peak_hour", 1.0)?
            .product("capacity_loss_x_peak", "capacity_loss_mw_lag_1h", "is_peak_hour", 1.0)?
            .ratio(
                "demand_to_supply_ratio",
                "demand_forecast_mw",
                &["thermal_generation_mw_lag_1h", "renewable_generation_mw_lag_1h"],
                1.0,
            )?
            .product("temperature_x_humidity", "temperature_c", "humidity_pct", 0.01)?;

        Ok(b.build())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn definitions(&self) -> &[FeatureDefinition] {
        &self.definitions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn publish(&self) -> PublishedManifest {
        PublishedManifest {
            version: self.version.clone(),
            features: self.names().map(str::to_string).collect(),
            defaults: Some(self.definitions.iter().map(|d| d.default).collect()),
        }
    }

    /// Check a published manifest against this one: same version, same names
    /// in the same order.
    pub fn verify(&self, published: &PublishedManifest) -> Result<(), ManifestError> {
        let mismatch = |detail: String| ManifestError::FeatureManifestMismatch {
            expected: self.version.clone(),
            found: published.version.clone(),
            detail,
        };

        if published.version != self.version {
            return Err(mismatch("version differs".to_string()));
        }

        let missing: Vec<&str> = self
            .names()
            .filter(|n| !published.features.iter().any(|p| p == n))
            .collect();
        let extra: Vec<&str> = published
            .features
            .iter()
            .map(String::as_str)
            .filter(|p| self.position(p).is_none())
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(mismatch(format!(
                "{} features expected, {} found; missing [{}]; extra [{}]",
                self.len(),
                published.features.len(),
                missing.join(", "),
                extra.join(", ")
            )));
        }
        if published.features.len() != self.len() {
            return Err(mismatch(format!(
                "{} features expected, {} found (duplicates)",
                self.len(),
                published.features.len()
            )));
        }

        if let Some((pos, (expected, found))) = self
            .names()
            .zip(published.features.iter())
            .enumerate()
            .find(|(_, (e, f))| e != f)
        {
            return Err(mismatch(format!(
                "position {pos}: expected {expected}, found {found}"
            )));
        }

        if let Some(defaults) = &published.defaults {
            if defaults.len() != self.len() {
                return Err(mismatch(format!(
                    "{} defaults for {} features",
                    defaults.len(),
                    self.len()
                )));
            }
        }
        Ok(())
    }

    /// Verify `published` and adopt its training defaults, if it has any.
    pub fn adopt(mut self, published: &PublishedManifest) -> Result<Self, ManifestError> {
        self.verify(published)?;
        if let Some(defaults) = &published.defaults {
            for (def, value) in self.definitions.iter_mut().zip(defaults) {
                def.default = *value;
            }
        }
        Ok(self)
    }
}

/// Builds a manifest one definition at a time, running the leakage guard on
/// each and resolving interaction operands against already-defined slots.
pub struct ManifestBuilder {
    version: String,
    guard: LeakageGuard,
    definitions: Vec<FeatureDefinition>,
    index: HashMap<String, usize>,
}

impl ManifestBuilder {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            guard: LeakageGuard::standard(),
            definitions: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn feature(&mut self, kind: FeatureKind, default: f64) -> Result<&mut Self, ManifestError> {
        let name = kind
            .default_name()
            .ok_or_else(|| ManifestError::Unnamed(kind.clone()))?;
        self.named(name, kind, default)
    }

    pub fn named(
        &mut self,
        name: impl Into<String>,
        kind: FeatureKind,
        default: f64,
    ) -> Result<&mut Self, ManifestError> {
        let name = name.into();
        self.guard.check(&name, &kind)?;
        if self.index.contains_key(&name) {
            return Err(ManifestError::DuplicateName(name));
        }
        self.index.insert(name.clone(), self.definitions.len());
        self.definitions.push(FeatureDefinition {
            name,
            kind,
            default,
        });
        Ok(self)
    }

    pub fn product(
        &mut self,
        name: &str,
        left: &str,
        right: &str,
        scale: f64,
    ) -> Result<&mut Self, ManifestError> {
        let left = self.operand(name, left)?;
        let right = self.operand(name, right)?;
        self.named(name, FeatureKind::Product { left, right, scale }, 0.0)
    }

    pub fn ratio(
        &mut self,
        name: &str,
        numerator: &str,
        denominator: &[&str],
        floor: f64,
    ) -> Result<&mut Self, ManifestError> {
        let numerator = self.operand(name, numerator)?;
        let denominator = denominator
            .iter()
            .map(|d| self.operand(name, d))
            .collect::<Result<Vec<_>, _>>()?;
        self.named(
            name,
            FeatureKind::Ratio {
                numerator,
                denominator,
                floor,
            },
            0.0,
        )
    }

    fn operand(&self, feature: &str, operand: &str) -> Result<usize, ManifestError> {
        self.index
            .get(operand)
            .copied()
            .ok_or_else(|| ManifestError::UnknownOperand {
                feature: feature.to_string(),
                operand: operand.to_string(),
            })
    }

    pub fn build(&self) -> FeatureManifest {
        FeatureManifest {
            version: self.version.clone(),
            definitions: self.definitions.clone(),
            index: self.index.clone(),
        }
    }
}
