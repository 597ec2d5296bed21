// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::cmp::Ordering as CmpOrdering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use rand::Rng;

use crate::clock::{Clock, NANOS_PER_SECOND};
use crate::error::{Error, Result};

use super::{check_capacity, Reservoir, Sample, Snapshot, UserValue};

/// Default interval between two priority rescales.
pub const DEFAULT_RESCALE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Floor for the largest weight after a rescale. Far above the subnormal
/// range, so relative weights survive any number of idle rescales.
const MIN_RESCALED_WEIGHT: f64 = 1e-200;

/// Forward-decaying priority reservoir.
///
/// An observation recorded at time `t` gets the weight `exp(alpha * (t - t0))`
/// where `t0` is the current landmark, and is stored under the priority
/// `weight / u` with `u` uniform in `(0, 1]`. When full, the lowest priority is
/// evicted, so retention is proportional to recency.
///
/// # Rescaling
///
/// Weights grow exponentially with the distance to the landmark and would
/// eventually overflow. Once per rescale interval every priority and weight is
/// multiplied by `exp(-alpha * (now - t0))` and the landmark moves to `now`.
/// After a long idle period the factor is clamped so the largest weight stays
/// representable; the stored samples are never dropped for having decayed.
/// Rescaling changes no relative weights, so snapshots are unaffected. It is
/// driven by [`rescale_if_needed`](Reservoir::rescale_if_needed), which the
/// owning context calls periodically and which every update also performs.
#[derive(Debug)]
pub struct ExponentiallyDecayingReservoir {
    capacity: usize,
    alpha: f64,
    rescale_interval: Duration,
    clock: Arc<dyn Clock>,
    count: AtomicU64,
    state: Mutex<DecayState>,
}

#[derive(Debug)]
struct DecayState {
    samples: BTreeMap<Priority, Sample>,
    /// Landmark in whole seconds.
    start_time: u64,
    /// Clock reading (nanoseconds) at which the next rescale is due.
    next_rescale: u64,
}

#[derive(Debug, Clone, Copy)]
struct Priority(f64);

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.total_cmp(&other.0)
    }
}

impl ExponentiallyDecayingReservoir {
    /// Creates a reservoir with the default rescale interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a zero capacity or an `alpha`
    /// that is not a finite positive number.
    pub fn new(capacity: usize, alpha: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_rescale_interval(capacity, alpha, DEFAULT_RESCALE_INTERVAL, clock)
    }

    /// Creates a reservoir rescaling every `rescale_interval`.
    pub fn with_rescale_interval(
        capacity: usize,
        alpha: f64,
        rescale_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        check_capacity(capacity)?;
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(Error::invalid_argument(format!(
                "decay factor must be finite and greater than zero, got {alpha}"
            )));
        }
        if rescale_interval.is_zero() {
            return Err(Error::invalid_argument(
                "rescale interval must be greater than zero",
            ));
        }

        let now = clock.nanoseconds();
        let state = DecayState {
            samples: BTreeMap::new(),
            start_time: now / NANOS_PER_SECOND,
            next_rescale: now.saturating_add(interval_nanos(rescale_interval)),
        };
        Ok(Self {
            capacity,
            alpha,
            rescale_interval,
            clock,
            count: AtomicU64::new(0),
            state: Mutex::new(state),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Records an observation at an explicit timestamp, in clock seconds.
    pub fn update_at(&self, value: i64, user_value: Option<UserValue>, timestamp: u64) {
        let mut state = self.state.lock();
        self.rescale_locked_if_due(&mut state);
        self.count.fetch_add(1, Ordering::Relaxed);

        let weight = (self.alpha * (timestamp as f64 - state.start_time as f64)).exp();
        let sample = Sample::new(value, user_value, weight);
        let u = 1.0 - rand::rng().random::<f64>();
        let priority = Priority(weight / u);

        if state.samples.len() < self.capacity {
            state.samples.entry(priority).or_insert(sample);
            return;
        }

        let lowest = match state.samples.keys().next() {
            Some(lowest) => *lowest,
            None => return,
        };
        if lowest < priority {
            if let Entry::Vacant(entry) = state.samples.entry(priority) {
                entry.insert(sample);
                state.samples.pop_first();
            }
        }
    }

    fn rescale_locked_if_due(&self, state: &mut DecayState) {
        let now = self.clock.nanoseconds();
        if now >= state.next_rescale {
            self.rescale_locked(state, now);
        }
    }

    fn rescale_locked(&self, state: &mut DecayState, now: u64) {
        let old_start = state.start_time;
        state.start_time = now / NANOS_PER_SECOND;
        state.next_rescale = now.saturating_add(interval_nanos(self.rescale_interval));

        let elapsed = state.start_time.saturating_sub(old_start) as f64;
        let factor = (-self.alpha * elapsed).exp();
        let max_weight = state
            .samples
            .values()
            .map(|sample| sample.weight)
            .fold(0.0_f64, f64::max);
        // The largest weight stays representable however long the idle period.
        let scale = if max_weight > 0.0 {
            factor.max(MIN_RESCALED_WEIGHT / max_weight).min(1.0)
        } else {
            factor
        };
        let before = state.samples.len();

        let samples = std::mem::take(&mut state.samples);
        for (priority, sample) in samples {
            let priority = priority.0 * scale;
            let weight = sample.weight * scale;
            if priority == 0.0 || weight == 0.0 {
                continue;
            }
            state
                .samples
                .insert(Priority(priority), Sample { weight, ..sample });
        }

        debug!(
            "Rescaled decaying reservoir by {scale:e} (decay {factor:e}): {} of {} samples kept",
            state.samples.len(),
            before
        );
    }

    #[cfg(test)]
    pub(crate) fn landmark(&self) -> u64 {
        self.state.lock().start_time
    }
}

impl Reservoir for ExponentiallyDecayingReservoir {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn size(&self) -> usize {
        self.state.lock().samples.len()
    }

    fn update(&self, value: i64, user_value: Option<UserValue>) {
        self.update_at(value, user_value, self.clock.seconds());
    }

    fn snapshot(&self) -> Snapshot {
        let samples: Vec<Sample> = self.state.lock().samples.values().cloned().collect();
        Snapshot::from_samples(self.count(), samples)
    }

    fn reset(&self) {
        let now = self.clock.nanoseconds();
        let mut state = self.state.lock();
        state.samples.clear();
        state.start_time = now / NANOS_PER_SECOND;
        state.next_rescale = now.saturating_add(interval_nanos(self.rescale_interval));
        self.count.store(0, Ordering::Relaxed);
    }

    fn rescale_interval(&self) -> Option<Duration> {
        Some(self.rescale_interval)
    }

    fn rescale_if_needed(&self) {
        let mut state = self.state.lock();
        self.rescale_locked_if_due(&mut state);
    }
}

fn interval_nanos(interval: Duration) -> u64 {
    interval.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn reservoir(capacity: usize, clock: &Arc<ManualClock>) -> ExponentiallyDecayingReservoir {
        ExponentiallyDecayingReservoir::new(capacity, 0.015, clock.clone()).unwrap()
    }

    #[test]
    fn test_fills_up_to_capacity() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(100, &clock);
        for value in 0..1000 {
            reservoir.update(value, None);
        }

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), 100);
        assert_eq!(snapshot.count(), 1000);
        assert!(snapshot.values().iter().all(|v| (0..1000).contains(v)));
    }

    #[test]
    fn test_small_stream_is_kept_entirely() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(100, &clock);
        for value in 0..10 {
            reservoir.update(value, None);
        }
        assert_eq!(reservoir.snapshot().size(), 10);
    }

    #[test]
    fn test_recent_values_dominate() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(10, &clock);

        for _ in 0..1000 {
            reservoir.update(1000, None);
            clock.advance(Duration::from_millis(100));
        }
        // Old values are still in the reservoir, half an hour later new ones arrive.
        clock.advance(Duration::from_secs(30 * 60));
        for _ in 0..1000 {
            reservoir.update(2000, None);
            clock.advance(Duration::from_millis(100));
        }

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), 10);
        assert!(snapshot.values().iter().all(|&v| v == 2000));
    }

    #[test]
    fn test_rescale_is_applied_lazily_on_update() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(10, &clock);
        reservoir.update(1, None);

        clock.advance(DEFAULT_RESCALE_INTERVAL + Duration::from_secs(1));
        reservoir.update(2, None);

        let state = reservoir.state.lock();
        assert_eq!(state.start_time, clock.seconds());
        assert!(state.samples.keys().all(|p| p.0.is_finite() && p.0 > 0.0));
    }

    #[test]
    fn test_weights_stay_finite_over_long_lifetimes() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(50, &clock);

        // Ten days at one observation per minute, far beyond exp() range
        // without rescaling.
        for minute in 0..(10 * 24 * 60) {
            reservoir.update(minute, None);
            clock.advance(Duration::from_secs(60));
        }

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), 50);
        assert!(snapshot.weights().iter().all(|w| w.is_finite()));
        assert!(snapshot.mean().is_finite());
    }

    #[test]
    fn test_idle_rescales_clamp_instead_of_dropping() {
        let clock = Arc::new(ManualClock::new());
        let reservoir = reservoir(10, &clock);
        for value in 0..5 {
            reservoir.update(value, None);
        }

        // Two idle days, one rescale per hour.
        for _ in 0..48 {
            clock.advance(DEFAULT_RESCALE_INTERVAL);
            reservoir.rescale_if_needed();
            assert_eq!(reservoir.landmark(), clock.seconds());
        }
        {
            let state = reservoir.state.lock();
            assert_eq!(state.samples.len(), 5);
            assert!(state
                .samples
                .values()
                .all(|sample| sample.weight >= MIN_RESCALED_WEIGHT / 2.0 && sample.weight.is_normal()));
        }

        // A fresh observation outweighs everything recorded before the idle period.
        reservoir.update(100, None);
        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), 6);
        assert!((snapshot.mean() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_alpha_is_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        assert!(ExponentiallyDecayingReservoir::new(10, 0.0, clock.clone()).is_err());
        assert!(ExponentiallyDecayingReservoir::new(10, f64::NAN, clock.clone()).is_err());
        assert!(ExponentiallyDecayingReservoir::with_rescale_interval(
            10,
            0.015,
            Duration::ZERO,
            clock
        )
        .is_err());
    }
}
