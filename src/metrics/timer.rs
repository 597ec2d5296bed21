// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::Result;
use crate::sampling::{Reservoir, Snapshot, UserValue};
use crate::scheduler::Scheduler;

use super::meter::DEFAULT_TICK_INTERVAL;
use super::{Histogram, HistogramValue, Meter, MeterValue, TimeUnit};

/// Measures how long something takes and how often it happens.
///
/// Durations are recorded in nanoseconds into a [`Histogram`]; every completed
/// timing also marks a [`Meter`]. Reported values are converted into the
/// timer's duration unit.
///
/// # Example
///
/// ```rust
/// use rsmetrics::{ManualClock, Timer, UniformReservoir};
/// use std::sync::Arc;
///
/// let timer = Timer::new(
///     Arc::new(UniformReservoir::new(1028)?),
///     Arc::new(ManualClock::new()),
/// );
/// let answer = timer.time(|| 6 * 7);
/// assert_eq!(answer, 42);
/// assert_eq!(timer.value().rate.count, 1);
/// # Ok::<(), rsmetrics::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

#[derive(Debug)]
struct TimerInner {
    clock: Arc<dyn Clock>,
    histogram: Histogram,
    meter: Meter,
    duration_unit: TimeUnit,
    active_sessions: AtomicI64,
    total_time: AtomicU64,
}

/// Point-in-time value of a [`Timer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerValue {
    pub rate: MeterValue,
    /// Duration distribution, expressed in `duration_unit`.
    pub histogram: HistogramValue,
    /// Timings started but not finished yet.
    pub active_sessions: i64,
    /// Sum of all recorded durations, in `duration_unit`.
    pub total_time: f64,
    pub duration_unit: TimeUnit,
}

impl Timer {
    /// Creates a timer reporting per-second rates and millisecond durations.
    pub fn new(reservoir: Arc<dyn Reservoir>, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(
            reservoir,
            clock,
            TimeUnit::Seconds,
            TimeUnit::Milliseconds,
            DEFAULT_TICK_INTERVAL,
        )
    }

    pub fn with_options(
        reservoir: Arc<dyn Reservoir>,
        clock: Arc<dyn Clock>,
        rate_unit: TimeUnit,
        duration_unit: TimeUnit,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(TimerInner {
                histogram: Histogram::new(reservoir),
                meter: Meter::with_options(clock.clone(), rate_unit, tick_interval),
                clock,
                duration_unit,
                active_sessions: AtomicI64::new(0),
                total_time: AtomicU64::new(0),
            }),
        }
    }

    /// Records an externally measured duration.
    pub fn record(&self, duration: Duration, user_value: Option<UserValue>) {
        let nanos = duration.as_nanos().min(i64::MAX as u128) as u64;
        self.record_nanos(nanos, user_value);
    }

    fn record_nanos(&self, nanos: u64, user_value: Option<UserValue>) {
        let inner = &self.inner;
        inner.histogram.update(nanos as i64, user_value);
        inner.meter.mark();
        let _ = inner
            .total_time
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Runs `action` and records how long it took.
    ///
    /// The duration is recorded even if `action` panics.
    pub fn time<F, R>(&self, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _context = self.new_context(None);
        action()
    }

    /// Like [`time`](Timer::time), tagging the recorded duration with `user_value`.
    pub fn time_with<F, R>(&self, user_value: UserValue, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _context = self.new_context(Some(user_value));
        action()
    }

    /// Starts a timing that is recorded when the returned guard is dropped.
    pub fn new_context(&self, user_value: Option<UserValue>) -> TimerContext {
        self.inner.active_sessions.fetch_add(1, Ordering::Relaxed);
        TimerContext {
            timer: self.clone(),
            start: self.inner.clock.nanoseconds(),
            user_value,
        }
    }

    pub fn count(&self) -> u64 {
        self.inner.meter.count()
    }

    /// Snapshot of the recorded durations, in nanoseconds.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.histogram.snapshot()
    }

    pub fn value(&self) -> TimerValue {
        let inner = &self.inner;
        let to_unit = 1.0 / inner.duration_unit.nanos() as f64;
        TimerValue {
            rate: inner.meter.value(),
            histogram: inner.histogram.value().scale(to_unit),
            active_sessions: inner.active_sessions.load(Ordering::Relaxed),
            total_time: inner
                .duration_unit
                .from_nanos(inner.total_time.load(Ordering::Relaxed) as f64),
            duration_unit: inner.duration_unit,
        }
    }

    pub fn reset(&self) {
        self.inner.histogram.reset();
        self.inner.meter.reset();
        self.inner.total_time.store(0, Ordering::Relaxed);
    }

    pub(crate) fn start(&self, scheduler: &Scheduler) -> Result<()> {
        self.inner.meter.start(scheduler)?;
        self.inner.histogram.start(scheduler)
    }

    pub(crate) fn stop(&self) {
        self.inner.meter.stop();
        self.inner.histogram.stop();
    }
}

/// RAII guard of one timing started by [`Timer::new_context`].
///
/// When this guard is dropped, on every exit path including unwinding, the
/// elapsed time is recorded to the timer.
///
/// # Example
///
/// ```rust,ignore
/// let context = timer.new_context(None);
/// // ... do work ...
/// drop(context); // records the duration
/// ```
#[derive(Debug)]
pub struct TimerContext {
    timer: Timer,
    start: u64,
    user_value: Option<UserValue>,
}

impl TimerContext {
    /// Time elapsed since the timing started.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(
            self.timer
                .inner
                .clock
                .nanoseconds()
                .saturating_sub(self.start),
        )
    }

    /// Replaces the user value recorded with this timing.
    pub fn track_user_value(&mut self, user_value: UserValue) {
        self.user_value = Some(user_value);
    }
}

impl Drop for TimerContext {
    fn drop(&mut self) {
        let inner = &self.timer.inner;
        let elapsed = inner.clock.nanoseconds().saturating_sub(self.start);
        inner.active_sessions.fetch_sub(1, Ordering::Relaxed);
        self.timer.record_nanos(elapsed, self.user_value.take());
    }
}
