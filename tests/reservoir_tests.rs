// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Reservoir and Snapshot Tests
//!
//! Statistical properties of the sampling engine:
//! - weighted snapshot statistics
//! - quantile validation
//! - bounded size for every reservoir variant
//! - uniform retention probability
//! - rescaling invariance of the decaying reservoir, including long idle periods

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use rsmetrics::{
    Clock, Error, ExponentiallyDecayingReservoir, ManualClock, Reservoir, SlidingWindowReservoir,
    Snapshot, UniformReservoir,
};

fn init_test_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new())
}

#[test]
fn test_weighted_snapshot_statistics() -> Result<()> {
    let snapshot = Snapshot::from_weighted(&[5, 1, 2, 3, 4], &[1.0, 2.0, 3.0, 2.0, 2.0])?;

    assert_eq!(snapshot.values(), &[1, 2, 3, 4, 5]);
    assert_eq!(snapshot.size(), 5);
    assert_eq!(snapshot.min(), 1);
    assert_eq!(snapshot.max(), 5);
    assert_eq!(snapshot.value(0.0)?, 1.0);
    assert_eq!(snapshot.value(1.0)?, 5.0);
    assert_eq!(snapshot.median(), 3.0);
    assert_eq!(snapshot.percentile_75(), 4.0);
    for percentile in [
        snapshot.percentile_95(),
        snapshot.percentile_98(),
        snapshot.percentile_99(),
        snapshot.percentile_999(),
    ] {
        assert_eq!(percentile, 5.0);
    }
    assert!((snapshot.mean() - 2.7).abs() < 1e-9);
    assert!((snapshot.std_dev() - 1.2688).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_empty_snapshot() -> Result<()> {
    let snapshot = Snapshot::empty();
    assert_eq!(snapshot.min(), 0);
    assert_eq!(snapshot.max(), 0);
    assert_eq!(snapshot.mean(), 0.0);
    assert_eq!(snapshot.std_dev(), 0.0);
    assert_eq!(snapshot.value(0.5)?, 0.0);
    Ok(())
}

#[test]
fn test_invalid_quantiles_are_rejected() -> Result<()> {
    let weighted = Snapshot::from_weighted(&[1, 2, 3], &[1.0, 1.0, 2.0])?;
    let unweighted = Snapshot::from_values([1, 2, 3]);

    for snapshot in [&weighted, &unweighted] {
        for quantile in [-0.1, 1.1, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(snapshot.value(quantile), Err(Error::InvalidArgument { .. })),
                "quantile {quantile} should be rejected"
            );
        }
    }
    Ok(())
}

#[test]
fn test_mismatched_weights_are_rejected() {
    assert!(matches!(
        Snapshot::from_weighted(&[1, 2], &[1.0]),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        Snapshot::from_weighted(&[1, 2], &[1.0, 0.0]),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_size_never_exceeds_capacity() -> Result<()> {
    init_test_logger();
    let clock = manual_clock();
    let reservoirs: Vec<Arc<dyn Reservoir>> = vec![
        Arc::new(UniformReservoir::new(16)?),
        Arc::new(SlidingWindowReservoir::new(16)?),
        Arc::new(ExponentiallyDecayingReservoir::new(16, 0.015, clock.clone())?),
    ];

    let mut rng = rand::rng();
    for step in 0..1_000 {
        let value = rng.random_range(-1_000..1_000);
        for reservoir in &reservoirs {
            reservoir.update(value, None);
            assert!(reservoir.size() <= 16);
            assert!(reservoir.snapshot().size() <= 16);
        }
        if step % 100 == 0 {
            clock.advance(Duration::from_secs(30));
        }
    }

    for reservoir in &reservoirs {
        assert_eq!(reservoir.count(), 1_000);
        assert_eq!(reservoir.snapshot().count(), 1_000);
    }
    Ok(())
}

#[test]
fn test_uniform_retention_converges() -> Result<()> {
    const CAPACITY: usize = 10;
    const STREAM: i64 = 100;
    const TRIALS: usize = 2_000;

    let mut retained = vec![0usize; STREAM as usize];
    for _ in 0..TRIALS {
        let reservoir = UniformReservoir::new(CAPACITY)?;
        for value in 0..STREAM {
            reservoir.update(value, None);
        }
        for &value in reservoir.snapshot().values() {
            retained[value as usize] += 1;
        }
    }

    // Every value should be retained with probability C/N.
    let expected = TRIALS * CAPACITY / STREAM as usize;
    for (value, &hits) in retained.iter().enumerate() {
        assert!(
            hits.abs_diff(expected) <= 70,
            "value {value} retained {hits} times, expected about {expected}"
        );
    }
    Ok(())
}

#[test]
fn test_rescale_without_records_keeps_values() -> Result<()> {
    init_test_logger();
    let clock = manual_clock();
    let reservoir = ExponentiallyDecayingReservoir::with_rescale_interval(
        100,
        0.015,
        Duration::from_secs(3600),
        clock.clone(),
    )?;
    for value in 0..50 {
        reservoir.update(value, None);
        clock.advance(Duration::from_secs(1));
    }
    let before = reservoir.snapshot();

    clock.advance(Duration::from_secs(2 * 3600));
    reservoir.rescale_if_needed();
    let after = reservoir.snapshot();

    assert_eq!(before.values(), after.values());
    assert_eq!(after.size(), 50);
    assert!((before.mean() - after.mean()).abs() < 1e-9);
    assert!((before.median() - after.median()).abs() < 1e-9);
    Ok(())
}

#[test]
fn test_long_idle_rescales_keep_samples() -> Result<()> {
    init_test_logger();
    let clock = manual_clock();
    let reservoir = ExponentiallyDecayingReservoir::new(100, 0.015, clock.clone())?;
    for value in 0..50 {
        reservoir.update(value, None);
    }
    let before = reservoir.snapshot();

    // Two idle days with the default hourly rescale.
    for hour in 1..=48 {
        clock.advance(Duration::from_secs(3600));
        reservoir.rescale_if_needed();
        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), 50, "samples lost after {hour}h idle");
        assert_eq!(snapshot.values(), before.values());
    }

    let after = reservoir.snapshot();
    assert!((before.mean() - after.mean()).abs() < 1e-9);
    assert!((before.median() - after.median()).abs() < 1e-9);
    assert!(after.weights().iter().all(|w| w.is_finite() && *w > 0.0));
    Ok(())
}

#[test]
fn test_decaying_reservoir_favours_recent_values() -> Result<()> {
    let clock = manual_clock();
    let reservoir = ExponentiallyDecayingReservoir::new(100, 0.015, clock.clone())?;

    for _ in 0..1_000 {
        reservoir.update(1, None);
    }
    // Fifteen minutes later the old values have decayed heavily.
    clock.advance(Duration::from_secs(15 * 60));
    assert!(clock.seconds() >= 900);
    for _ in 0..1_000 {
        reservoir.update(1_000, None);
    }

    let snapshot = reservoir.snapshot();
    assert_eq!(snapshot.size(), 100);
    assert_eq!(snapshot.median(), 1_000.0);
    Ok(())
}

#[test]
fn test_sliding_window_keeps_last_values() -> Result<()> {
    let reservoir = SlidingWindowReservoir::new(3)?;
    for value in 1..=5 {
        reservoir.update(value, Some(format!("v{value}").into()));
    }

    let snapshot = reservoir.snapshot();
    assert_eq!(snapshot.values(), &[3, 4, 5]);
    assert_eq!(snapshot.min_user_value().map(|v| &**v), Some("v3"));
    assert_eq!(snapshot.max_user_value().map(|v| &**v), Some("v5"));
    Ok(())
}
