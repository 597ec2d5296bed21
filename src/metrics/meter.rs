// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{Clock, NANOS_PER_SECOND};
use crate::error::Result;
use crate::scheduler::{Scheduler, TaskHandle};

use super::ewma::Ewma;
use super::TimeUnit;

/// Default interval between two moving-average updates.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

const UNSET: u64 = u64::MAX;

/// Event counter with 1, 5 and 15 minute exponentially-weighted rates.
///
/// Marking only touches atomics. The moving averages are folded forward by
/// [`tick`](Meter::tick), which the owning context calls on a fixed interval
/// from its scheduler, so producers never pay for rate math.
#[derive(Debug, Clone)]
pub struct Meter {
    inner: Arc<MeterInner>,
}

#[derive(Debug)]
struct MeterInner {
    clock: Arc<dyn Clock>,
    rate_unit: TimeUnit,
    tick_interval: Duration,
    count: AtomicU64,
    /// Marks not yet folded into the moving averages.
    uncounted: AtomicU64,
    /// Clock reading of the first mark, `UNSET` before it.
    first_mark: AtomicU64,
    rates: Mutex<Rates>,
    ticker: Mutex<Option<TaskHandle>>,
}

#[derive(Debug)]
struct Rates {
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Rates {
    fn new(tick_interval: Duration) -> Self {
        Self {
            m1: Ewma::one_minute(tick_interval),
            m5: Ewma::five_minutes(tick_interval),
            m15: Ewma::fifteen_minutes(tick_interval),
        }
    }
}

/// Point-in-time value of a [`Meter`], rates per `rate_unit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterValue {
    pub count: u64,
    pub mean_rate: f64,
    pub one_minute_rate: f64,
    pub five_minute_rate: f64,
    pub fifteen_minute_rate: f64,
    pub rate_unit: TimeUnit,
}

impl MeterValue {
    /// Re-expresses the rates in another unit.
    pub fn scale(&self, rate_unit: TimeUnit) -> MeterValue {
        let factor = rate_unit.nanos() as f64 / self.rate_unit.nanos() as f64;
        MeterValue {
            count: self.count,
            mean_rate: self.mean_rate * factor,
            one_minute_rate: self.one_minute_rate * factor,
            five_minute_rate: self.five_minute_rate * factor,
            fifteen_minute_rate: self.fifteen_minute_rate * factor,
            rate_unit,
        }
    }
}

impl Meter {
    /// Creates a meter reporting per-second rates with the default tick interval.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_options(clock, TimeUnit::Seconds, DEFAULT_TICK_INTERVAL)
    }

    pub fn with_options(clock: Arc<dyn Clock>, rate_unit: TimeUnit, tick_interval: Duration) -> Self {
        Self {
            inner: Arc::new(MeterInner {
                clock,
                rate_unit,
                tick_interval,
                count: AtomicU64::new(0),
                uncounted: AtomicU64::new(0),
                first_mark: AtomicU64::new(UNSET),
                rates: Mutex::new(Rates::new(tick_interval)),
                ticker: Mutex::new(None),
            }),
        }
    }

    #[inline]
    pub fn mark(&self) {
        self.mark_n(1);
    }

    pub fn mark_n(&self, n: u64) {
        if self.inner.first_mark.load(Ordering::Relaxed) == UNSET {
            let now = self.inner.clock.nanoseconds();
            let _ = self.inner.first_mark.compare_exchange(
                UNSET,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
        self.inner.count.fetch_add(n, Ordering::Relaxed);
        self.inner.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    /// Folds the marks of the elapsed interval into the moving averages.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Events per second since the first mark.
    pub fn mean_rate(&self) -> f64 {
        let count = self.count();
        let first = self.inner.first_mark.load(Ordering::Relaxed);
        if count == 0 || first == UNSET {
            return 0.0;
        }
        let elapsed = self.inner.clock.nanoseconds().saturating_sub(first);
        if elapsed == 0 {
            return 0.0;
        }
        count as f64 / (elapsed as f64 / NANOS_PER_SECOND as f64)
    }

    /// Events per second, one-minute moving average.
    pub fn one_minute_rate(&self) -> f64 {
        self.inner.rates.lock().m1.rate()
    }

    pub fn five_minute_rate(&self) -> f64 {
        self.inner.rates.lock().m5.rate()
    }

    pub fn fifteen_minute_rate(&self) -> f64 {
        self.inner.rates.lock().m15.rate()
    }

    pub fn value(&self) -> MeterValue {
        let (m1, m5, m15) = {
            let rates = self.inner.rates.lock();
            (rates.m1.rate(), rates.m5.rate(), rates.m15.rate())
        };
        let unit = self.inner.rate_unit;
        MeterValue {
            count: self.count(),
            mean_rate: unit.scale_rate(self.mean_rate()),
            one_minute_rate: unit.scale_rate(m1),
            five_minute_rate: unit.scale_rate(m5),
            fifteen_minute_rate: unit.scale_rate(m15),
            rate_unit: unit,
        }
    }

    pub fn reset(&self) {
        let mut rates = self.inner.rates.lock();
        rates.m1.reset();
        rates.m5.reset();
        rates.m15.reset();
        self.inner.count.store(0, Ordering::Relaxed);
        self.inner.uncounted.store(0, Ordering::Relaxed);
        self.inner.first_mark.store(UNSET, Ordering::Relaxed);
    }

    /// Starts ticking on `scheduler`. The task ends by itself once every
    /// handle to the meter is gone.
    pub(crate) fn start(&self, scheduler: &Scheduler) -> Result<()> {
        let weak: Weak<MeterInner> = Arc::downgrade(&self.inner);
        let task = scheduler.spawn_periodic("meter-tick", self.inner.tick_interval, move || {
            match weak.upgrade() {
                Some(inner) => {
                    inner.tick();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }
        })?;
        *self.inner.ticker.lock() = Some(task);
        Ok(())
    }

    /// Stops ticking and waits for an in-flight tick to finish.
    pub(crate) fn stop(&self) {
        let task = self.inner.ticker.lock().take();
        if let Some(mut task) = task {
            task.cancel();
        }
    }
}

impl MeterInner {
    fn tick(&self) {
        let count = self.uncounted.swap(0, Ordering::Relaxed);
        let mut rates = self.rates.lock();
        rates.m1.tick(count);
        rates.m5.tick(count);
        rates.m15.tick(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn meter() -> (Meter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (Meter::new(clock.clone()), clock)
    }

    #[test]
    fn test_starts_at_zero() {
        let (meter, _clock) = meter();
        let value = meter.value();
        assert_eq!(value.count, 0);
        assert_eq!(value.mean_rate, 0.0);
        assert_eq!(value.one_minute_rate, 0.0);
    }

    #[test]
    fn test_marks_do_not_move_rates_until_tick() {
        let (meter, _clock) = meter();
        meter.mark_n(10);
        assert_eq!(meter.count(), 10);
        assert_eq!(meter.one_minute_rate(), 0.0);

        meter.tick();
        // 10 events during a 5 second tick
        assert!((meter.one_minute_rate() - 2.0).abs() < 1e-9);
        assert!((meter.five_minute_rate() - 2.0).abs() < 1e-9);
        assert!((meter.fifteen_minute_rate() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_rate_since_first_mark() {
        let (meter, clock) = meter();
        clock.advance(Duration::from_secs(100));
        meter.mark();
        clock.advance(Duration::from_secs(10));
        meter.mark_n(9);

        assert!((meter.mean_rate() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rate_unit_scaling() {
        let clock = Arc::new(ManualClock::new());
        let meter = Meter::with_options(clock.clone(), TimeUnit::Minutes, DEFAULT_TICK_INTERVAL);
        meter.mark_n(5);
        meter.tick();
        clock.advance(Duration::from_secs(5));

        let value = meter.value();
        assert_eq!(value.rate_unit, TimeUnit::Minutes);
        assert!((value.one_minute_rate - 60.0).abs() < 1e-9);
        assert!((value.mean_rate - 60.0).abs() < 1e-9);

        let per_second = value.scale(TimeUnit::Seconds);
        assert!((per_second.one_minute_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let (meter, clock) = meter();
        meter.mark_n(4);
        meter.tick();
        clock.advance(Duration::from_secs(1));
        meter.reset();

        let value = meter.value();
        assert_eq!(value.count, 0);
        assert_eq!(value.mean_rate, 0.0);
        assert_eq!(value.fifteen_minute_rate, 0.0);
    }

    #[test]
    fn test_scheduled_ticks_and_stop() {
        let clock = Arc::new(ManualClock::new());
        let meter = Meter::with_options(clock, TimeUnit::Seconds, Duration::from_millis(10));
        let scheduler = Scheduler::new("meter-test");
        meter.start(&scheduler).unwrap();

        meter.mark_n(100);
        std::thread::sleep(Duration::from_millis(100));
        assert!(meter.one_minute_rate() > 0.0);

        meter.stop();
        let frozen = meter.one_minute_rate();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(meter.one_minute_rate(), frozen);
        scheduler.shutdown();
    }
}
