// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::sampling::{Reservoir, Snapshot, UserValue};
use crate::scheduler::{Scheduler, TaskHandle};

/// Distribution of `i64` values.
///
/// Percentiles, mean and standard deviation come from the reservoir and
/// therefore only describe the sampled window. Count, sum, min, max and the
/// last value are tracked separately and cover every value ever recorded.
#[derive(Debug, Clone)]
pub struct Histogram {
    inner: Arc<HistogramInner>,
}

#[derive(Debug)]
struct HistogramInner {
    reservoir: Arc<dyn Reservoir>,
    count: AtomicU64,
    sum: AtomicI64,
    min: AtomicI64,
    max: AtomicI64,
    last: Mutex<Option<(i64, Option<UserValue>)>>,
    rescaler: Mutex<Option<TaskHandle>>,
}

/// Point-in-time value of a [`Histogram`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HistogramValue {
    /// Values recorded over the histogram's lifetime.
    pub count: u64,
    pub sum: f64,
    /// Lifetime minimum, 0 before the first value.
    pub min: f64,
    /// Lifetime maximum, 0 before the first value.
    pub max: f64,
    pub last_value: f64,
    pub last_user_value: Option<UserValue>,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    pub percentile_98: f64,
    pub percentile_99: f64,
    pub percentile_999: f64,
    /// Number of values in the sampled window.
    pub sample_size: usize,
    pub min_user_value: Option<UserValue>,
    pub max_user_value: Option<UserValue>,
}

impl HistogramValue {
    /// Multiplies every value-like field by `factor`; counts are unchanged.
    pub fn scale(&self, factor: f64) -> HistogramValue {
        HistogramValue {
            count: self.count,
            sum: self.sum * factor,
            min: self.min * factor,
            max: self.max * factor,
            last_value: self.last_value * factor,
            last_user_value: self.last_user_value.clone(),
            mean: self.mean * factor,
            std_dev: self.std_dev * factor,
            median: self.median * factor,
            percentile_75: self.percentile_75 * factor,
            percentile_95: self.percentile_95 * factor,
            percentile_98: self.percentile_98 * factor,
            percentile_99: self.percentile_99 * factor,
            percentile_999: self.percentile_999 * factor,
            sample_size: self.sample_size,
            min_user_value: self.min_user_value.clone(),
            max_user_value: self.max_user_value.clone(),
        }
    }
}

impl Histogram {
    pub fn new(reservoir: Arc<dyn Reservoir>) -> Self {
        Self {
            inner: Arc::new(HistogramInner {
                reservoir,
                count: AtomicU64::new(0),
                sum: AtomicI64::new(0),
                min: AtomicI64::new(i64::MAX),
                max: AtomicI64::new(i64::MIN),
                last: Mutex::new(None),
                rescaler: Mutex::new(None),
            }),
        }
    }

    pub fn update(&self, value: i64, user_value: Option<UserValue>) {
        let inner = &self.inner;
        inner.count.fetch_add(1, Ordering::Relaxed);
        let _ = inner
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(value))
            });
        inner.min.fetch_min(value, Ordering::Relaxed);
        inner.max.fetch_max(value, Ordering::Relaxed);
        *inner.last.lock() = Some((value, user_value.clone()));
        inner.reservoir.update(value, user_value);
    }

    /// Values recorded over the histogram's lifetime.
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.reservoir.snapshot()
    }

    pub fn value(&self) -> HistogramValue {
        let inner = &self.inner;
        let snapshot = inner.reservoir.snapshot();
        let count = inner.count.load(Ordering::Relaxed);
        let min = inner.min.load(Ordering::Relaxed);
        let max = inner.max.load(Ordering::Relaxed);
        // Still at the sentinels, or an update has not reached both yet.
        let (min, max) = if min > max {
            (0.0, 0.0)
        } else {
            (min as f64, max as f64)
        };
        let (last_value, last_user_value) = match &*inner.last.lock() {
            Some((value, user_value)) => (*value as f64, user_value.clone()),
            None => (0.0, None),
        };

        HistogramValue {
            count,
            sum: inner.sum.load(Ordering::Relaxed) as f64,
            min,
            max,
            last_value,
            last_user_value,
            mean: snapshot.mean(),
            std_dev: snapshot.std_dev(),
            median: snapshot.median(),
            percentile_75: snapshot.percentile_75(),
            percentile_95: snapshot.percentile_95(),
            percentile_98: snapshot.percentile_98(),
            percentile_99: snapshot.percentile_99(),
            percentile_999: snapshot.percentile_999(),
            sample_size: snapshot.size(),
            min_user_value: snapshot.min_user_value().cloned(),
            max_user_value: snapshot.max_user_value().cloned(),
        }
    }

    pub fn reset(&self) {
        let inner = &self.inner;
        let mut last = inner.last.lock();
        *last = None;
        inner.count.store(0, Ordering::Relaxed);
        inner.sum.store(0, Ordering::Relaxed);
        inner.min.store(i64::MAX, Ordering::Relaxed);
        inner.max.store(i64::MIN, Ordering::Relaxed);
        inner.reservoir.reset();
    }

    /// Schedules the reservoir's periodic rescale, if it needs one.
    pub(crate) fn start(&self, scheduler: &Scheduler) -> Result<()> {
        let Some(interval) = self.inner.reservoir.rescale_interval() else {
            return Ok(());
        };
        let weak: Weak<HistogramInner> = Arc::downgrade(&self.inner);
        let task = scheduler.spawn_periodic("reservoir-rescale", interval, move || {
            match weak.upgrade() {
                Some(inner) => {
                    inner.reservoir.rescale_if_needed();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }
        })?;
        *self.inner.rescaler.lock() = Some(task);
        Ok(())
    }

    pub(crate) fn stop(&self) {
        let task = self.inner.rescaler.lock().take();
        if let Some(mut task) = task {
            task.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_rescaling(&self) -> bool {
        self.inner.rescaler.lock().is_some()
    }
}
