//! Load Testing Suite
//!
//! Ingestion and inference share the history buffer:
//! - Concurrent writers and readers on the same location never produce a
//!   feature vector that mixes pre- and post-append state
//! - Locations do not interfere with each other
//! - Inference throughput with the full 54-slot pipeline

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::common::*;
use loadshed_forecast::domain::{LocationId, Observation, Signal};
use loadshed_forecast::features::SlotStatus;
use loadshed_forecast::{PredictionRequest, StageForecaster};

const HOURS: i64 = 96;
const LAGS: [u32; 3] = [1, 6, 24];

fn observation(h: i64) -> Observation {
    Observation::new(hour(h)).with_signal(Signal::CapacityLossMw, h as f64)
}

/// Every observed lag must read the hour it claims to read.
fn assert_consistent(f: &StageForecaster, location: &str, anchor: i64) {
    let features = f.features(&PredictionRequest::new(location, hour(anchor))).unwrap();
    for lag in LAGS {
        let name = format!("capacity_loss_mw_lag_{lag}h");
        if features.status_of(&name) == Some(SlotStatus::Observed) {
            assert_eq!(features.get(&name), Some((anchor - lag as i64) as f64), "{name} at {anchor}");
        }
    }
}

/// Test: Snapshot consistency under concurrent ingestion
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_and_predict() {
    let forecaster = Arc::new(forecaster(vec![rule_based()]));
    let locations = ["A", "B", "C", "D"];

    let mut tasks = JoinSet::new();

    // one writer per location
    for loc in locations {
        let f = Arc::clone(&forecaster);
        tasks.spawn(async move {
            let id = LocationId::from(loc);
            for h in 0..HOURS {
                f.ingest(&id, observation(h)).unwrap();
                tokio::task::yield_now().await;
            }
        });
    }

    // readers predict at a moving anchor while writers append
    for (i, loc) in locations.iter().cycle().take(12).enumerate() {
        let f = Arc::clone(&forecaster);
        let loc = *loc;
        tasks.spawn(async move {
            for step in 0..HOURS {
                let anchor = (step + i as i64) % HOURS + 1;
                assert_consistent(&f, loc, anchor);
                f.predict(&PredictionRequest::new(loc, hour(anchor))).unwrap();
                tokio::task::yield_now().await;
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.expect("Task should complete successfully");
    }

    for loc in locations {
        let id = LocationId::from(loc);
        assert_eq!(forecaster.history().len(&id), HOURS as usize);
        assert_eq!(forecaster.history().latest(&id), Some(hour(HOURS - 1)));
        assert_consistent(&forecaster, loc, HOURS);
    }
}

/// Test: Throughput benchmark
///
/// Measures how many predictions per second the pipeline sustains with a
/// full week of history.
#[tokio::test]
#[ignore] // Ignore by default as this is a slow test
async fn test_throughput_benchmark() {
    let forecaster = forecaster(vec![unloaded("xgboost"), rule_based()]);
    let id = LocationId::from("A");
    for h in 0..200 {
        forecaster.ingest(&id, full_observation(h, 1000.0 + h as f64)).unwrap();
    }

    let start = Instant::now();
    let mut operation_count = 0u64;
    let test_duration = Duration::from_secs(5);

    while start.elapsed() < test_duration {
        let anchor = 200 + (operation_count % 24) as i64;
        forecaster.predict(&PredictionRequest::new("A", hour(anchor))).unwrap();
        operation_count += 1;
    }

    let elapsed = start.elapsed();
    let ops_per_second = operation_count as f64 / elapsed.as_secs_f64();

    println!(
        "Throughput: {:.0} predictions/second ({} in {:?})",
        ops_per_second, operation_count, elapsed
    );

    assert!(
        ops_per_second > 100.0,
        "Throughput too low: {:.0} ops/s",
        ops_per_second
    );
}
