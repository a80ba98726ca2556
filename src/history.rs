//! Per-location history of hourly observations
//!
//! Each location owns a bounded, strictly time-ordered ring of observations.
//! Writers and readers of one location are serialized on that location's
//! mutex, so a feature computation always sees either the state before an
//! append or the state after it, never a mix. Locations never contend with
//! each other.

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{LocationId, Observation, ObservationError, MAX_LOOKBACK_HOURS};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HistoryError {
    #[error("out-of-order observation for {location}: {timestamp} is not after latest {latest}")]
    OutOfOrder {
        location: LocationId,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
    #[error("invalid observation for {location}: {source}")]
    InvalidObservation {
        location: LocationId,
        #[source]
        source: ObservationError,
    },
}

/// Consistent view of one location taken under a single lock acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub anchor: DateTime<Utc>,
    /// Observation recorded exactly at the anchor hour, if any
    pub current: Option<Observation>,
    /// Strictly earlier observations, oldest first, covering at most
    /// [`MAX_LOOKBACK_HOURS`] hours before the anchor
    pub window: Vec<Observation>,
}

#[derive(Debug, Default)]
struct LocationHistory {
    entries: VecDeque<Observation>,
}

impl LocationHistory {
    fn latest(&self) -> Option<DateTime<Utc>> {
        self.entries.back().map(|o| o.timestamp())
    }

    /// Entries with timestamp in `(anchor - span, anchor]`.
    fn range(&self, anchor: DateTime<Utc>, span: Duration) -> Vec<Observation> {
        let start = anchor - span;
        let lo = self.entries.partition_point(|o| o.timestamp() <= start);
        let hi = self.entries.partition_point(|o| o.timestamp() <= anchor);
        self.entries.range(lo..hi.max(lo)).cloned().collect()
    }

    fn at(&self, ts: DateTime<Utc>) -> Option<&Observation> {
        let idx = self.entries.partition_point(|o| o.timestamp() < ts);
        self.entries.get(idx).filter(|o| o.timestamp() == ts)
    }

    fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        while self
            .entries
            .front()
            .is_some_and(|o| o.timestamp() < cutoff)
        {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }
}

/// Longest retention a buffer keeps (one year).
pub const MAX_RETENTION_HOURS: i64 = 8760;

/// History buffer shared between ingestion and inference.
#[derive(Debug)]
pub struct HistoryBuffer {
    retention: Duration,
    locations: RwLock<HashMap<LocationId, Arc<Mutex<LocationHistory>>>>,
}

impl HistoryBuffer {
    /// Create a buffer keeping `retention_hours` of history behind the newest
    /// observation of each location, clamped to
    /// `MAX_LOOKBACK_HOURS..=MAX_RETENTION_HOURS`.
    pub fn new(retention_hours: i64) -> Self {
        Self {
            retention: Duration::hours(retention_hours.clamp(MAX_LOOKBACK_HOURS, MAX_RETENTION_HOURS)),
            locations: RwLock::new(HashMap::new()),
        }
    }

    /// Append an observation. The timestamp must be strictly later than the
    /// newest one already held for the location; on error nothing changes.
    pub fn record(&self, location: &LocationId, observation: Observation) -> Result<(), HistoryError> {
        observation
            .validate()
            .map_err(|source| HistoryError::InvalidObservation {
                location: location.clone(),
                source,
            })?;

        let slot = self.slot_or_insert(location);
        let mut history = slot.lock();

        let timestamp = observation.timestamp();
        if let Some(latest) = history.latest() {
            if timestamp <= latest {
                warn!(%location, %timestamp, %latest, "rejecting out-of-order observation");
                return Err(HistoryError::OutOfOrder {
                    location: location.clone(),
                    timestamp,
                    latest,
                });
            }
        }

        history.entries.push_back(observation);
        let evicted = history.evict_before(timestamp - self.retention);
        if evicted > 0 {
            debug!(%location, evicted, "evicted expired observations");
        }
        Ok(())
    }

    /// Observations with timestamp in `(anchor - span_hours, anchor]`, oldest
    /// first. Returns fewer than `span_hours` entries when history is short;
    /// never pads.
    pub fn window(&self, location: &LocationId, anchor: DateTime<Utc>, span_hours: i64) -> Vec<Observation> {
        match self.slot(location) {
            Some(slot) => slot.lock().range(anchor, Duration::hours(span_hours.max(0))),
            None => Vec::new(),
        }
    }

    /// The anchor-hour observation plus the preceding look-back window, read
    /// atomically with respect to concurrent `record` calls.
    pub fn snapshot(&self, location: &LocationId, anchor: DateTime<Utc>) -> HistorySnapshot {
        let Some(slot) = self.slot(location) else {
            return HistorySnapshot {
                anchor,
                current: None,
                window: Vec::new(),
            };
        };

        let history = slot.lock();
        HistorySnapshot {
            anchor,
            current: history.at(anchor).cloned(),
            window: history.range(anchor - Duration::hours(1), Duration::hours(MAX_LOOKBACK_HOURS)),
        }
    }

    pub fn latest(&self, location: &LocationId) -> Option<DateTime<Utc>> {
        self.slot(location).and_then(|slot| slot.lock().latest())
    }

    pub fn len(&self, location: &LocationId) -> usize {
        self.slot(location).map_or(0, |slot| slot.lock().entries.len())
    }

    pub fn locations(&self) -> Vec<LocationId> {
        let mut ids: Vec<_> = self.locations.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn slot(&self, location: &LocationId) -> Option<Arc<Mutex<LocationHistory>>> {
        self.locations.read().get(location).cloned()
    }

    fn slot_or_insert(&self, location: &LocationId) -> Arc<Mutex<LocationHistory>> {
        if let Some(slot) = self.slot(location) {
            return slot;
        }
        self.locations
            .write()
            .entry(location.clone())
            .or_default()
            .clone()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(MAX_LOOKBACK_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Signal;
    use chrono::TimeZone;

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn obs(h: i64, loss: f64) -> Observation {
        Observation::new(hour(h)).with_signal(Signal::CapacityLossMw, loss)
    }

    #[test]
    fn test_record_and_window() {
        let buffer = HistoryBuffer::default();
        let loc = LocationId::from("A");
        for h in 0..10 {
            buffer.record(&loc, obs(h, h as f64)).unwrap();
        }

        let window = buffer.window(&loc, hour(9), 3);
        let stamps: Vec<_> = window.iter().map(|o| o.timestamp()).collect();
        assert_eq!(stamps, vec![hour(7), hour(8), hour(9)]);

        // anchor past the newest observation
        assert_eq!(buffer.window(&loc, hour(12), 5).len(), 2);
        // short history is not padded
        assert_eq!(buffer.window(&loc, hour(3), 24).len(), 4);
    }

    #[test]
    fn test_out_of_order_leaves_buffer_unchanged() {
        let buffer = HistoryBuffer::default();
        let loc = LocationId::from("A");
        buffer.record(&loc, obs(5, 1.0)).unwrap();

        let err = buffer.record(&loc, obs(5, 2.0)).unwrap_err();
        assert!(matches!(err, HistoryError::OutOfOrder { .. }));
        let err = buffer.record(&loc, obs(3, 2.0)).unwrap_err();
        assert!(matches!(err, HistoryError::OutOfOrder { .. }));

        assert_eq!(buffer.len(&loc), 1);
        assert_eq!(
            buffer.window(&loc, hour(5), 1)[0].value(Signal::CapacityLossMw),
            Some(1.0)
        );
    }

    #[test]
    fn test_locations_are_independent() {
        let buffer = HistoryBuffer::default();
        buffer.record(&"A".into(), obs(5, 1.0)).unwrap();
        // an earlier timestamp is fine for a different location
        buffer.record(&"B".into(), obs(1, 1.0)).unwrap();
        assert_eq!(buffer.locations(), vec![LocationId::from("A"), LocationId::from("B")]);
    }

    #[test]
    fn test_invalid_observation_rejected() {
        let buffer = HistoryBuffer::default();
        let loc = LocationId::from("A");
        let unaligned = Observation::new(hour(1) + Duration::minutes(15));
        assert!(matches!(
            buffer.record(&loc, unaligned),
            Err(HistoryError::InvalidObservation { .. })
        ));
        assert_eq!(buffer.len(&loc), 0);
    }

    #[test]
    fn test_retention_evicts_old_entries() {
        let buffer = HistoryBuffer::new(168);
        let loc = LocationId::from("A");
        for h in 0..400 {
            buffer.record(&loc, obs(h, 0.0)).unwrap();
        }
        // newest at 399, oldest kept is 399 - 168
        assert_eq!(buffer.len(&loc), 169);
        assert_eq!(buffer.window(&loc, hour(399), 1000)[0].timestamp(), hour(231));
    }

    #[test]
    fn test_retention_is_clamped() {
        let buffer = HistoryBuffer::new(i64::MAX);
        assert_eq!(buffer.retention, Duration::hours(MAX_RETENTION_HOURS));
        let buffer = HistoryBuffer::new(-5);
        assert_eq!(buffer.retention, Duration::hours(MAX_LOOKBACK_HOURS));
    }

    #[test]
    fn test_snapshot_splits_current_and_past() {
        let buffer = HistoryBuffer::default();
        let loc = LocationId::from("A");
        for h in 0..30 {
            buffer.record(&loc, obs(h, h as f64)).unwrap();
        }

        let snap = buffer.snapshot(&loc, hour(20));
        assert_eq!(snap.current.as_ref().map(|o| o.timestamp()), Some(hour(20)));
        assert_eq!(snap.window.len(), 20);
        assert_eq!(snap.window.last().unwrap().timestamp(), hour(19));

        let empty = buffer.snapshot(&"nowhere".into(), hour(20));
        assert!(empty.current.is_none());
        assert!(empty.window.is_empty());
    }
}
