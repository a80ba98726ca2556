//! Feature transformer
//!
//! Turns the anchor-hour observation and the history window before it into
//! the manifest's fixed-order vector. Pure and deterministic: the same
//! inputs always give bit-identical output, and nothing here does I/O.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::f64::consts::TAU;
use std::sync::Arc;
use tracing::debug;

use super::manifest::{CalendarFeature, FeatureKind, FeatureManifest, ManifestError};
use crate::domain::{Observation, Signal};

/// Where a slot's value came from.
///
/// Ordered by how much the value had to be made up, so combining the status
/// of interaction operands is a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Computed from the exact points the definition asks for
    Observed,
    /// Rolling/difference computed over fewer points than the span
    Partial,
    /// Lag filled with the nearest available value from the window
    Imputed,
    /// No usable data; the manifest's training default was used
    Default,
}

impl SlotStatus {
    pub fn is_flagged(&self) -> bool {
        *self != SlotStatus::Observed
    }
}

/// Output of the transformer, tied to the manifest that laid it out.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    manifest: Arc<FeatureManifest>,
    values: Vec<f64>,
    status: Vec<SlotStatus>,
}

impl FeatureVector {
    pub fn manifest(&self) -> &FeatureManifest {
        &self.manifest
    }

    pub fn manifest_version(&self) -> &str {
        self.manifest.version()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn status(&self) -> &[SlotStatus] {
        &self.status
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.manifest.position(name).map(|i| self.values[i])
    }

    pub fn status_of(&self, name: &str) -> Option<SlotStatus> {
        self.manifest.position(name).map(|i| self.status[i])
    }

    /// Names of all slots that were not computed from exact data.
    pub fn flagged(&self) -> Vec<String> {
        self.manifest
            .names()
            .zip(&self.status)
            .filter(|(_, s)| s.is_flagged())
            .map(|(n, _)| n.to_string())
            .collect()
    }

    /// SHA-256 over the manifest version and the IEEE-754 bits of each value.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.manifest.version().as_bytes());
        for v in &self.values {
            hasher.update(v.to_bits().to_le_bytes());
        }
        encode_hex(&hasher.finalize())
    }
}

pub(crate) fn encode_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Read-only view of the history window relative to an anchor.
///
/// Entries at or after the anchor are ignored, so a caller handing in a
/// window that reaches the anchor still gets causal features.
struct PastWindow<'a> {
    anchor: DateTime<Utc>,
    past: &'a [Observation],
}

impl<'a> PastWindow<'a> {
    fn new(anchor: DateTime<Utc>, window: &'a [Observation]) -> Self {
        let end = window.partition_point(|o| o.timestamp() < anchor);
        Self {
            anchor,
            past: &window[..end],
        }
    }

    fn target(&self, hours_back: u32) -> DateTime<Utc> {
        self.anchor - Duration::hours(hours_back as i64)
    }

    /// Exact value at `anchor - hours_back`.
    fn value_at(&self, signal: Signal, hours_back: u32) -> Option<f64> {
        let ts = self.target(hours_back);
        self.past
            .binary_search_by_key(&ts, |o| o.timestamp())
            .ok()
            .and_then(|i| self.past[i].value(signal))
    }

    /// Nearest earlier value at or before `anchor - hours_back`, falling back
    /// to the most recent value anywhere in the window.
    fn carry_forward(&self, signal: Signal, hours_back: u32) -> Option<f64> {
        let ts = self.target(hours_back);
        let upto = self.past.partition_point(|o| o.timestamp() <= ts);
        self.past[..upto]
            .iter()
            .rev()
            .find_map(|o| o.value(signal))
            .or_else(|| self.past.iter().rev().find_map(|o| o.value(signal)))
    }

    /// Values in the `hours` slots `[anchor - hours, anchor)`, oldest first.
    fn trailing(&self, signal: Signal, hours: u32) -> Vec<f64> {
        let start = self.target(hours);
        let from = self.past.partition_point(|o| o.timestamp() < start);
        self.past[from..]
            .iter()
            .filter_map(|o| o.value(signal))
            .collect()
    }
}

/// Mean and population standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub fn is_peak_hour(hour: u32) -> bool {
    (6..=10).contains(&hour) || (17..=21).contains(&hour)
}

fn cyclical(position: f64, period: f64) -> (f64, f64) {
    let angle = TAU * position / period;
    (angle.sin(), angle.cos())
}

fn calendar_value(feature: CalendarFeature, anchor: DateTime<Utc>) -> f64 {
    use CalendarFeature::*;

    let hour = anchor.hour() as f64;
    let dow = anchor.weekday().num_days_from_monday() as f64;
    let month0 = anchor.month0() as f64;
    let day0 = anchor.day0() as f64;
    let week0 = (anchor.iso_week().week() - 1) as f64;

    match feature {
        HourSin => cyclical(hour, 24.0).0,
        HourCos => cyclical(hour, 24.0).1,
        DayOfWeekSin => cyclical(dow, 7.0).0,
        DayOfWeekCos => cyclical(dow, 7.0).1,
        MonthSin => cyclical(month0, 12.0).0,
        MonthCos => cyclical(month0, 12.0).1,
        DayOfMonthSin => cyclical(day0, 31.0).0,
        DayOfMonthCos => cyclical(day0, 31.0).1,
        WeekOfYearSin => cyclical(week0, 53.0).0,
        WeekOfYearCos => cyclical(week0, 53.0).1,
        IsPeakHour => bool_value(is_peak_hour(anchor.hour())),
        IsWeekend => bool_value(dow >= 5.0),
    }
}

fn bool_value(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Builds feature vectors in manifest order.
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    manifest: Arc<FeatureManifest>,
}

impl FeatureTransformer {
    pub fn new(manifest: Arc<FeatureManifest>) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &Arc<FeatureManifest> {
        &self.manifest
    }

    /// Compute every slot for `anchor`.
    ///
    /// `current` supplies the anchor-hour values (already merged with any user
    /// overrides); `window` is the history strictly before the anchor, oldest
    /// first.
    pub fn transform(
        &self,
        current: &Observation,
        window: &[Observation],
        anchor: DateTime<Utc>,
    ) -> Result<FeatureVector, ManifestError> {
        let past = PastWindow::new(anchor, window);
        let definitions = self.manifest.definitions();
        let mut values = Vec::with_capacity(definitions.len());
        let mut status: Vec<SlotStatus> = Vec::with_capacity(definitions.len());

        for def in definitions {
            let (value, slot) = match &def.kind {
                FeatureKind::Current { signal } => match current.value(*signal) {
                    Some(v) => (v, SlotStatus::Observed),
                    None => (def.default, SlotStatus::Default),
                },
                FeatureKind::Lag { signal, hours } => match past.value_at(*signal, *hours) {
                    Some(v) => (v, SlotStatus::Observed),
                    None => match past.carry_forward(*signal, *hours) {
                        Some(v) => (v, SlotStatus::Imputed),
                        None => (def.default, SlotStatus::Default),
                    },
                },
                FeatureKind::RollingMean { signal, hours } => {
                    rolling(&past.trailing(*signal, *hours), *hours, def.default, |p| mean_std(p).0)
                }
                FeatureKind::RollingStd { signal, hours } => {
                    rolling(&past.trailing(*signal, *hours), *hours, def.default, |p| mean_std(p).1)
                }
                FeatureKind::Difference { signal } => {
                    match (past.value_at(*signal, 1), past.value_at(*signal, 2)) {
                        (Some(a), Some(b)) => (a - b, SlotStatus::Observed),
                        _ => match (past.carry_forward(*signal, 1), past.carry_forward(*signal, 2)) {
                            (Some(a), Some(b)) => (a - b, SlotStatus::Partial),
                            _ => (def.default, SlotStatus::Default),
                        },
                    }
                }
                FeatureKind::Calendar { feature } => {
                    (calendar_value(*feature, anchor), SlotStatus::Observed)
                }
                FeatureKind::Product { left, right, scale } => (
                    values[*left] * values[*right] * scale,
                    status[*left].max(status[*right]),
                ),
                FeatureKind::Ratio {
                    numerator,
                    denominator,
                    floor,
                } => {
                    let sum: f64 = denominator.iter().map(|i| values[*i]).sum();
                    let worst = denominator
                        .iter()
                        .map(|i| status[*i])
                        .fold(status[*numerator], SlotStatus::max);
                    (values[*numerator] / sum.max(*floor), worst)
                }
            };
            values.push(value);
            status.push(slot);
        }

        if values.len() != self.manifest.len() {
            return Err(ManifestError::FeatureManifestMismatch {
                expected: self.manifest.version().to_string(),
                found: self.manifest.version().to_string(),
                detail: format!(
                    "transformer produced {} values for {} slots",
                    values.len(),
                    self.manifest.len()
                ),
            });
        }

        debug!(
            anchor = %anchor,
            history_points = past.past.len(),
            imputed = status.iter().filter(|s| **s == SlotStatus::Imputed).count(),
            partial = status.iter().filter(|s| **s == SlotStatus::Partial).count(),
            defaulted = status.iter().filter(|s| **s == SlotStatus::Default).count(),
            "feature vector built"
        );

        Ok(FeatureVector {
            manifest: Arc::clone(&self.manifest),
            values,
            status,
        })
    }
}

fn rolling(points: &[f64], span: u32, default: f64, stat: impl Fn(&[f64]) -> f64) -> (f64, SlotStatus) {
    if points.is_empty() {
        (default, SlotStatus::Default)
    } else if points.len() < span as usize {
        (stat(points), SlotStatus::Partial)
    } else {
        (stat(points), SlotStatus::Observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        // a Wednesday
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn hour(h: i64) -> DateTime<Utc> {
        start() + Duration::hours(h)
    }

    fn transformer() -> FeatureTransformer {
        FeatureTransformer::new(Arc::new(FeatureManifest::v1().unwrap()))
    }

    fn linear_history(hours: i64) -> Vec<Observation> {
        (0..hours)
            .map(|h| {
                Observation::new(hour(h))
                    .with_signal(Signal::CapacityLossMw, 10.0 + h as f64)
                    .with_signal(Signal::ThermalGenerationMw, 20_000.0)
                    .with_signal(Signal::RenewableGenerationMw, 2_000.0)
                    .with_signal(Signal::PlannedOutageMw, 4_000.0)
            })
            .collect()
    }

    #[test]
    fn test_lag_and_rolling_over_linear_history() {
        let history = linear_history(24);
        let anchor = hour(24);
        let fv = transformer()
            .transform(&Observation::new(anchor), &history, anchor)
            .unwrap();

        assert_eq!(fv.get("capacity_loss_mw_lag_24h"), Some(10.0));
        assert_eq!(fv.get("capacity_loss_mw_lag_1h"), Some(33.0));
        assert_eq!(fv.get("capacity_loss_mw_lag_6h"), Some(28.0));
        assert_eq!(fv.get("capacity_loss_mw_roll_mean_24h"), Some(21.5));
        assert_eq!(fv.get("capacity_loss_mw_roll_mean_3h"), Some(32.0));
        assert_eq!(fv.get("capacity_loss_mw_diff_1h"), Some(1.0));
        assert_eq!(fv.status_of("capacity_loss_mw_roll_mean_24h"), Some(SlotStatus::Observed));

        // 168h lag is older than the history: carried from the nearest value
        assert_eq!(fv.status_of("capacity_loss_mw_lag_168h"), Some(SlotStatus::Imputed));
        assert_eq!(fv.get("capacity_loss_mw_lag_168h"), Some(33.0));
    }

    #[test]
    fn test_rolling_std_is_population_std() {
        let history = linear_history(24);
        let anchor = hour(24);
        let fv = transformer()
            .transform(&Observation::new(anchor), &history, anchor)
            .unwrap();

        // values 28..=33: population variance of six consecutive integers = 35/12
        let expected = (35.0_f64 / 12.0).sqrt();
        let got = fv.get("capacity_loss_mw_roll_std_6h").unwrap();
        assert!((got - expected).abs() < 1e-12);
        assert_eq!(fv.get("thermal_generation_mw_roll_std_24h"), Some(0.0));
    }

    #[test]
    fn test_gap_is_imputed_from_earlier_value() {
        let mut history = linear_history(30);
        // drop the point 24h before the anchor
        history.remove(6);
        let anchor = hour(30);
        let fv = transformer()
            .transform(&Observation::new(anchor), &history, anchor)
            .unwrap();

        assert_eq!(fv.status_of("capacity_loss_mw_lag_24h"), Some(SlotStatus::Imputed));
        assert_eq!(fv.get("capacity_loss_mw_lag_24h"), Some(15.0));
        assert_eq!(
            fv.status_of("capacity_loss_mw_roll_mean_24h"),
            Some(SlotStatus::Partial)
        );
    }

    #[test]
    fn test_empty_history_uses_defaults() {
        let anchor = hour(0);
        let t = transformer();
        let fv = t.transform(&Observation::new(anchor), &[], anchor).unwrap();

        for (def, status) in t.manifest().definitions().iter().zip(fv.status()) {
            if def.kind.uses_history() {
                assert_eq!(*status, SlotStatus::Default, "{}", def.name);
            }
        }
        assert_eq!(fv.get("thermal_generation_mw_lag_1h"), Some(22_000.0));
        assert_eq!(fv.get("humidity_pct"), Some(60.0));
        assert_eq!(fv.status_of("humidity_pct"), Some(SlotStatus::Default));
    }

    #[test]
    fn test_future_entries_are_ignored() {
        let history = linear_history(48);
        let anchor = hour(24);
        let t = transformer();
        let with_future = t.transform(&Observation::new(anchor), &history, anchor).unwrap();
        let causal = t
            .transform(&Observation::new(anchor), &history[..24], anchor)
            .unwrap();
        assert_eq!(with_future.values(), causal.values());
    }

    #[test]
    fn test_calendar_encodings() {
        // Saturday 2024-05-04 18:00, peak hour
        let anchor = Utc.with_ymd_and_hms(2024, 5, 4, 18, 0, 0).unwrap();
        let fv = transformer()
            .transform(&Observation::new(anchor), &[], anchor)
            .unwrap();

        assert_eq!(fv.get("is_peak_hour"), Some(1.0));
        assert_eq!(fv.get("is_weekend"), Some(1.0));
        let (sin, cos) = (fv.get("hour_sin").unwrap(), fv.get("hour_cos").unwrap());
        assert!((sin * sin + cos * cos - 1.0).abs() < 1e-12);
        assert!((sin - (TAU * 18.0 / 24.0).sin()).abs() < 1e-12);
    }

    #[test]
    fn test_peak_hours() {
        let peaks: Vec<u32> = (0..24).filter(|h| is_peak_hour(*h)).collect();
        assert_eq!(peaks, vec![6, 7, 8, 9, 10, 17, 18, 19, 20, 21]);
    }

    #[test]
    fn test_interactions() {
        let history = linear_history(24);
        let anchor = hour(24 + 18);
        let history: Vec<_> = history
            .into_iter()
            .map(|o| {
                Observation::new(o.timestamp() + Duration::hours(18))
                    .with_signal(Signal::ThermalGenerationMw, 20_000.0)
                    .with_signal(Signal::RenewableGenerationMw, 5_000.0)
            })
            .collect();
        let current = Observation::new(anchor)
            .with_signal(Signal::DemandForecastMw, 30_000.0)
            .with_signal(Signal::TemperatureC, 30.0)
            .with_signal(Signal::HumidityPct, 50.0);

        let fv = transformer().transform(&current, &history, anchor).unwrap();
        assert_eq!(fv.get("thermal_x_peak"), Some(20_000.0));
        assert_eq!(fv.get("demand_to_supply_ratio"), Some(1.2));
        assert_eq!(fv.get("temperature_x_humidity"), Some(15.0));
        assert_eq!(fv.status_of("temperature_x_humidity"), Some(SlotStatus::Observed));
    }

    #[test]
    fn test_checksum_tracks_values() {
        let history = linear_history(24);
        let anchor = hour(24);
        let t = transformer();
        let a = t.transform(&Observation::new(anchor), &history, anchor).unwrap();
        let b = t.transform(&Observation::new(anchor), &history, anchor).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 64);

        let c = t
            .transform(&Observation::new(anchor), &history[1..], anchor)
            .unwrap();
        assert_ne!(a.checksum(), c.checksum());
    }
}
