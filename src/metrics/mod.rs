// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Instruments
//!
//! This module provides the instruments applications record into, plus the
//! metadata and value types reporters read back.
//!
//! # Instruments
//!
//! - [`Counter`]: signed atomic counter with optional per-item sub-counts
//! - [`Gauge`]: pull-based value computed by a user function on read
//! - [`Meter`]: event count plus 1/5/15-minute moving-average rates
//! - [`Histogram`]: value distribution backed by a [`Reservoir`](crate::Reservoir)
//! - [`Timer`]: histogram of durations combined with a meter of calls
//!
//! # Design Principles
//!
//! - **Handles**: every instrument is a cheap `Clone` handle over shared state,
//!   so it can be handed to as many producer threads as needed.
//! - **Instrument-local synchronisation**: write paths use atomics or a lock
//!   owned by the instrument; they never touch the registry.
//! - **Frozen reads**: `value()` returns a plain value type with no link back
//!   to the instrument.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

mod counter;
mod ewma;
mod gauge;
mod histogram;
mod meter;
mod timer;

pub use counter::{Counter, CounterItem, CounterValue};
pub use gauge::{Gauge, ValueProvider};
pub(crate) use gauge::ratio_provider;
pub use histogram::{Histogram, HistogramValue};
pub use meter::{Meter, MeterValue};
pub use timer::{Timer, TimerContext, TimerValue};

use crate::sampling::SamplingType;

/// Kind of a registered metric. A name is bound to one kind per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetricKind {
    Counter,
    Gauge,
    Meter,
    Histogram,
    Timer,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "Counter",
            MetricKind::Gauge => "Gauge",
            MetricKind::Meter => "Meter",
            MetricKind::Histogram => "Histogram",
            MetricKind::Timer => "Timer",
        };
        f.write_str(name)
    }
}

/// What a metric counts or measures, e.g. `Requests` or `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Unit(Cow<'static, str>);

impl Unit {
    pub const NONE: Unit = Unit(Cow::Borrowed(""));
    pub const CALLS: Unit = Unit(Cow::Borrowed("Calls"));
    pub const REQUESTS: Unit = Unit(Cow::Borrowed("Requests"));
    pub const ITEMS: Unit = Unit(Cow::Borrowed("Items"));
    pub const ERRORS: Unit = Unit(Cow::Borrowed("Errors"));
    pub const BYTES: Unit = Unit(Cow::Borrowed("Bytes"));
    pub const COMMANDS: Unit = Unit(Cow::Borrowed("Commands"));
    pub const EVENTS: Unit = Unit(Cow::Borrowed("Events"));
    pub const RESULTS: Unit = Unit(Cow::Borrowed("Results"));
    pub const THREADS: Unit = Unit(Cow::Borrowed("Threads"));
    pub const PERCENT: Unit = Unit(Cow::Borrowed("%"));

    pub fn custom(name: impl Into<String>) -> Self {
        Unit(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for Unit {
    fn default() -> Self {
        Unit::NONE
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-form labels attached to a metric.
///
/// ```rust
/// use rsmetrics::MetricTags;
///
/// let tags = MetricTags::from("db, critical ,");
/// assert_eq!(tags.tags(), &["db".to_string(), "critical".to_string()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct MetricTags(Vec<String>);

impl MetricTags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        MetricTags(
            tags.into_iter()
                .map(|tag| tag.as_ref().trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
        )
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for MetricTags {
    /// Parses a comma separated list.
    fn from(tags: &str) -> Self {
        MetricTags::new(tags.split(','))
    }
}

impl From<Vec<String>> for MetricTags {
    fn from(tags: Vec<String>) -> Self {
        MetricTags::new(tags)
    }
}

/// Time unit used to express rates and durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds.
    pub const fn nanos(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 60 * 60 * 1_000_000_000,
            TimeUnit::Days => 24 * 60 * 60 * 1_000_000_000,
        }
    }

    /// Converts a nanosecond amount into this unit.
    pub fn from_nanos(self, nanos: f64) -> f64 {
        nanos / self.nanos() as f64
    }

    /// Converts a per-second rate into a rate per this unit.
    pub fn scale_rate(self, per_second: f64) -> f64 {
        per_second * (self.nanos() as f64 / TimeUnit::Seconds.nanos() as f64)
    }

    pub fn abbreviation(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "days",
        }
    }
}

/// Registration options for the `*_with` methods of
/// [`MetricContext`](crate::MetricContext).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricOptions {
    pub unit: Unit,
    pub tags: MetricTags,
    /// Reservoir of histograms and timers.
    pub sampling: SamplingType,
    /// Unit rates of meters and timers are expressed in, per-second by default.
    pub rate_unit: TimeUnit,
    /// Unit timer durations are expressed in, milliseconds by default.
    pub duration_unit: TimeUnit,
}

impl Default for MetricOptions {
    fn default() -> Self {
        Self {
            unit: Unit::NONE,
            tags: MetricTags::default(),
            sampling: SamplingType::Default,
            rate_unit: TimeUnit::Seconds,
            duration_unit: TimeUnit::Milliseconds,
        }
    }
}

impl MetricOptions {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            ..Self::default()
        }
    }
}

/// Point-in-time value of any instrument.
#[derive(Debug, Clone, Serialize)]
pub enum MetricValue {
    Counter(CounterValue),
    /// `NaN` when the gauge's provider failed.
    Gauge(f64),
    Meter(MeterValue),
    Histogram(HistogramValue),
    Timer(TimerValue),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Meter(_) => MetricKind::Meter,
            MetricValue::Histogram(_) => MetricKind::Histogram,
            MetricValue::Timer(_) => MetricKind::Timer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_conversions() {
        assert_eq!(TimeUnit::Milliseconds.from_nanos(2_500_000.0), 2.5);
        assert_eq!(TimeUnit::Minutes.scale_rate(2.0), 120.0);
        assert_eq!(TimeUnit::Milliseconds.scale_rate(1000.0), 1.0);
        assert_eq!(TimeUnit::Hours.nanos(), 3_600_000_000_000);
    }

    #[test]
    fn test_tags_from_vec_drop_blanks() {
        let tags = MetricTags::from(vec!["a".to_string(), " ".to_string(), " b".to_string()]);
        assert_eq!(tags.tags(), &["a".to_string(), "b".to_string()]);
        assert!(MetricTags::from("").is_empty());
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(Unit::REQUESTS.to_string(), "Requests");
        assert_eq!(Unit::custom("Widgets").name(), "Widgets");
        assert_eq!(Unit::default(), Unit::NONE);
    }

    #[test]
    fn test_metric_kind_display() {
        assert_eq!(MetricKind::Histogram.to_string(), "Histogram");
    }
}
