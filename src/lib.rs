// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! # rsmetrics: In-process Metrics Instrumentation
//!
//! `rsmetrics` lets an application register named counters, gauges, meters,
//! histograms and timers, samples what they observe into bounded reservoirs,
//! and hands point-in-time values to whatever reporter the application runs.
//!
//! ## Features
//!
//! - **Bounded sampling**: uniform, sliding-window and exponentially decaying
//!   reservoirs keep memory constant under unbounded write rates.
//! - **Weighted statistics**: [`Snapshot`] computes quantiles, mean and
//!   standard deviation over weighted samples.
//! - **Moving-average rates**: [`Meter`] tracks 1, 5 and 15 minute EWMA rates.
//! - **Hierarchical registry**: [`MetricContext`] organises instruments into a
//!   tree with get-or-create registration and cascading shutdown.
//! - **No global state**: everything hangs off an explicit root context.
//!
//! ## Core Concepts
//!
//! - **`MetricContext`**: named registry node owning instruments and child
//!   contexts. Handles are cheap to clone and safe to share across threads.
//! - **Instruments**: [`Counter`], [`Gauge`], [`Meter`], [`Histogram`] and
//!   [`Timer`], all `Clone` handles whose write paths never take a registry
//!   lock.
//! - **`Reservoir`**: the sampling strategy behind histograms and timers,
//!   selected with [`SamplingType`].
//! - **`MetricsData`**: immutable tree of values returned by
//!   [`MetricContext::enumerate_metrics`].
//!
//! ## Getting Started
//!
//! ```rust
//! use rsmetrics::{MetricContext, SamplingType, Unit};
//!
//! let root = MetricContext::new("app");
//! let http = root.context("http")?;
//!
//! let requests = http.meter("requests", Unit::REQUESTS)?;
//! let latency = http.timer("latency", Unit::REQUESTS, SamplingType::Default)?;
//! let payload = http.histogram("payload", Unit::BYTES, SamplingType::SlidingWindow { size: 512 })?;
//!
//! latency.time(|| {
//!     requests.mark();
//!     payload.update(1_536, None);
//! });
//!
//! let data = root.enumerate_metrics()?;
//! for (path, entry) in data.flatten() {
//!     println!("{path} ({}): {:?}", entry.kind, entry.value);
//! }
//!
//! // Stops every background task of the tree.
//! root.shutdown();
//! # Ok::<(), rsmetrics::Error>(())
//! ```
//!
//! ## Background Tasks
//!
//! Meters fold new marks into their moving averages every tick and decaying
//! reservoirs periodically rescale their priorities. These run on a
//! single-threaded tokio runtime owned by the root context, started on first
//! use. The application does not need a runtime of its own, and calling
//! [`MetricContext::shutdown`] from inside an async context is fine.
//!
//! ## Feature Flags
//!
//! - `tracing`: adds `tracing` spans around context shutdown and enumeration.

mod clock;
mod config;
mod context;
mod data;
mod error;
mod health;
pub mod metrics;
pub mod sampling;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DecayConfig, ErrorHandler, MetricsConfig};
pub use context::MetricContext;
pub use data::{MetricEntry, MetricsData};
pub use error::{Error, Result};
pub use health::{HealthCheckResult, HealthStatus, HealthStatusProvider};
pub use metrics::{
    Counter, CounterItem, CounterValue, Gauge, Histogram, HistogramValue, Meter, MeterValue,
    MetricKind, MetricOptions, MetricTags, MetricValue, TimeUnit, Timer, TimerContext, TimerValue,
    Unit, ValueProvider,
};
pub use sampling::{
    ExponentiallyDecayingReservoir, Reservoir, Sample, SamplingType, SlidingWindowReservoir,
    Snapshot, UniformReservoir, UserValue,
};
