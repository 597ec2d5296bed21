// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical metric registry.
//!
//! A [`MetricContext`] is a named node owning the instruments registered in it
//! and its child contexts. The tree is created from an explicit root; there is
//! no global registry.
//!
//! # Locking
//!
//! Each context guards its children and registrations with its own lock,
//! which is only taken for structural changes (registration, lookup,
//! shutdown) and to copy handles out for enumeration. Instruments carry their
//! own synchronisation, so recording never touches a context lock and
//! sibling subtrees never contend.
//!
//! # Lifecycle
//!
//! [`MetricContext::shutdown`] disposes the context and its whole subtree:
//! background tasks of every instrument are cancelled before it returns, and
//! the root additionally stops the shared scheduler. Handles obtained earlier
//! keep working as plain in-memory instruments. Dropping the last handle of a
//! context that was never shut down performs the same cleanup.

use std::collections::BTreeMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::MetricsConfig;
use crate::data::{MetricEntry, MetricsData};
use crate::error::{panic_message, Error, Result};
use crate::health::{HealthCheckResult, HealthStatus};
use crate::metrics::{
    ratio_provider, Counter, Gauge, Histogram, Meter, MetricKind, MetricOptions, MetricTags,
    MetricValue, Timer, Unit, ValueProvider,
};
use crate::sampling::SamplingType;
use crate::scheduler::Scheduler;

/// Node of the metrics tree.
///
/// `MetricContext` is a cheap `Clone` handle; clones refer to the same node.
///
/// # Example
///
/// ```rust
/// use rsmetrics::{MetricContext, Unit};
///
/// let root = MetricContext::new("app");
/// let requests = root.context("http")?.counter("requests", Unit::REQUESTS)?;
/// requests.increment();
///
/// let data = root.enumerate_metrics()?;
/// assert_eq!(data.flatten()[0].0, "app.http.requests");
/// root.shutdown();
/// # Ok::<(), rsmetrics::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MetricContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    name: String,
    shared: Arc<Shared>,
    parent: Option<Weak<ContextInner>>,
    disposed: AtomicBool,
    state: Mutex<ContextState>,
}

/// State common to every context of one tree.
#[derive(Debug)]
struct Shared {
    config: Arc<MetricsConfig>,
    scheduler: Scheduler,
}

#[derive(Debug, Default)]
struct ContextState {
    children: BTreeMap<String, MetricContext>,
    metrics: BTreeMap<String, Registration>,
}

#[derive(Debug, Clone)]
struct Registration {
    instrument: Instrument,
    unit: Unit,
    tags: MetricTags,
}

#[derive(Debug, Clone)]
enum Instrument {
    Counter(Counter),
    Gauge(Gauge),
    Meter(Meter),
    Histogram(Histogram),
    Timer(Timer),
}

impl Instrument {
    fn kind(&self) -> MetricKind {
        match self {
            Instrument::Counter(_) => MetricKind::Counter,
            Instrument::Gauge(_) => MetricKind::Gauge,
            Instrument::Meter(_) => MetricKind::Meter,
            Instrument::Histogram(_) => MetricKind::Histogram,
            Instrument::Timer(_) => MetricKind::Timer,
        }
    }

    fn value(&self) -> MetricValue {
        match self {
            Instrument::Counter(counter) => MetricValue::Counter(counter.value()),
            Instrument::Gauge(gauge) => MetricValue::Gauge(gauge.value()),
            Instrument::Meter(meter) => MetricValue::Meter(meter.value()),
            Instrument::Histogram(histogram) => MetricValue::Histogram(histogram.value()),
            Instrument::Timer(timer) => MetricValue::Timer(timer.value()),
        }
    }

    fn start(&self, scheduler: &Scheduler) -> Result<()> {
        match self {
            Instrument::Meter(meter) => meter.start(scheduler),
            Instrument::Histogram(histogram) => histogram.start(scheduler),
            Instrument::Timer(timer) => timer.start(scheduler),
            Instrument::Counter(_) | Instrument::Gauge(_) => Ok(()),
        }
    }

    fn stop(&self) {
        match self {
            Instrument::Meter(meter) => meter.stop(),
            Instrument::Histogram(histogram) => histogram.stop(),
            Instrument::Timer(timer) => timer.stop(),
            Instrument::Counter(_) | Instrument::Gauge(_) => {}
        }
    }

    fn reset(&self) {
        match self {
            Instrument::Counter(counter) => counter.reset(),
            Instrument::Meter(meter) => meter.reset(),
            Instrument::Histogram(histogram) => histogram.reset(),
            Instrument::Timer(timer) => timer.reset(),
            Instrument::Gauge(_) => {}
        }
    }
}

impl MetricContext {
    /// Creates a root context with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MetricsConfig::default())
    }

    /// Creates a root context. `config` applies to the whole tree.
    pub fn with_config(name: impl Into<String>, config: MetricsConfig) -> Self {
        let name = name.into();
        let scheduler = Scheduler::new(config.scheduler_thread_name.clone());
        debug!("Created root metric context '{name}'");
        Self {
            inner: Arc::new(ContextInner {
                name,
                shared: Arc::new(Shared {
                    config: Arc::new(config),
                    scheduler,
                }),
                parent: None,
                disposed: AtomicBool::new(false),
                state: Mutex::new(ContextState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.inner.shared.config
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Returns the child context called `name`, creating it on first use.
    pub fn context(&self, name: &str) -> Result<MetricContext> {
        let mut state = self.inner.state.lock();
        self.check_not_disposed()?;

        if let Some(child) = state.children.get(name) {
            return Ok(child.clone());
        }

        let child = MetricContext {
            inner: Arc::new(ContextInner {
                name: name.to_string(),
                shared: self.inner.shared.clone(),
                parent: Some(Arc::downgrade(&self.inner)),
                disposed: AtomicBool::new(false),
                state: Mutex::new(ContextState::default()),
            }),
        };
        state.children.insert(name.to_string(), child.clone());
        debug!("Created metric context '{name}' under '{}'", self.inner.name);
        Ok(child)
    }

    pub fn counter(&self, name: &str, unit: Unit) -> Result<Counter> {
        self.counter_with(name, &MetricOptions::new(unit))
    }

    pub fn counter_with(&self, name: &str, options: &MetricOptions) -> Result<Counter> {
        self.get_or_create(
            name,
            MetricKind::Counter,
            options,
            |instrument| match instrument {
                Instrument::Counter(counter) => Some(counter.clone()),
                _ => None,
            },
            |_| Ok(Instrument::Counter(Counter::new())),
        )
    }

    pub fn meter(&self, name: &str, unit: Unit) -> Result<Meter> {
        self.meter_with(name, &MetricOptions::new(unit))
    }

    pub fn meter_with(&self, name: &str, options: &MetricOptions) -> Result<Meter> {
        self.get_or_create(
            name,
            MetricKind::Meter,
            options,
            |instrument| match instrument {
                Instrument::Meter(meter) => Some(meter.clone()),
                _ => None,
            },
            |config| {
                Ok(Instrument::Meter(Meter::with_options(
                    config.clock.clone(),
                    options.rate_unit,
                    config.decay.tick_interval,
                )))
            },
        )
    }

    pub fn histogram(&self, name: &str, unit: Unit, sampling: SamplingType) -> Result<Histogram> {
        let options = MetricOptions {
            sampling,
            ..MetricOptions::new(unit)
        };
        self.histogram_with(name, &options)
    }

    pub fn histogram_with(&self, name: &str, options: &MetricOptions) -> Result<Histogram> {
        self.get_or_create(
            name,
            MetricKind::Histogram,
            options,
            |instrument| match instrument {
                Instrument::Histogram(histogram) => Some(histogram.clone()),
                _ => None,
            },
            |config| {
                let reservoir = options.sampling.build(config, config.clock.clone())?;
                Ok(Instrument::Histogram(Histogram::new(reservoir)))
            },
        )
    }

    pub fn timer(&self, name: &str, unit: Unit, sampling: SamplingType) -> Result<Timer> {
        let options = MetricOptions {
            sampling,
            ..MetricOptions::new(unit)
        };
        self.timer_with(name, &options)
    }

    pub fn timer_with(&self, name: &str, options: &MetricOptions) -> Result<Timer> {
        self.get_or_create(
            name,
            MetricKind::Timer,
            options,
            |instrument| match instrument {
                Instrument::Timer(timer) => Some(timer.clone()),
                _ => None,
            },
            |config| {
                let reservoir = options.sampling.build(config, config.clock.clone())?;
                Ok(Instrument::Timer(Timer::with_options(
                    reservoir,
                    config.clock.clone(),
                    options.rate_unit,
                    options.duration_unit,
                    config.decay.tick_interval,
                )))
            },
        )
    }

    /// Registers a gauge sampling `provider` on every read.
    ///
    /// If the name is already registered as a gauge, the existing gauge is
    /// returned and `provider` is discarded.
    pub fn gauge<F>(&self, name: &str, unit: Unit, provider: F) -> Result<Gauge>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.gauge_with(name, &MetricOptions::new(unit), provider)
    }

    pub fn gauge_with<F>(&self, name: &str, options: &MetricOptions, provider: F) -> Result<Gauge>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.register_gauge(name, options, Arc::new(provider))
    }

    /// Registers a gauge reporting `numerator / denominator`; the value is
    /// `NaN` while the denominator is 0.
    pub fn ratio_gauge<N, D>(&self, name: &str, unit: Unit, numerator: N, denominator: D) -> Result<Gauge>
    where
        N: Fn() -> f64 + Send + Sync + 'static,
        D: Fn() -> f64 + Send + Sync + 'static,
    {
        self.register_gauge(
            name,
            &MetricOptions::new(unit),
            ratio_provider(numerator, denominator),
        )
    }

    fn register_gauge(
        &self,
        name: &str,
        options: &MetricOptions,
        provider: ValueProvider,
    ) -> Result<Gauge> {
        let path = format!("{}.{name}", self.inner.name);
        self.get_or_create(
            name,
            MetricKind::Gauge,
            options,
            |instrument| match instrument {
                Instrument::Gauge(gauge) => Some(gauge.clone()),
                _ => None,
            },
            |_| {
                Ok(Instrument::Gauge(Gauge::build(
                    path,
                    provider,
                    Some(self.inner.shared.config.clone()),
                )))
            },
        )
    }

    /// Shared get-or-create path of every instrument kind.
    fn get_or_create<T>(
        &self,
        name: &str,
        kind: MetricKind,
        options: &MetricOptions,
        existing: impl FnOnce(&Instrument) -> Option<T>,
        create: impl FnOnce(&MetricsConfig) -> Result<Instrument>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock();
        self.check_not_disposed()?;

        if let Some(registration) = state.metrics.get(name) {
            let found = registration.instrument.kind();
            return existing(&registration.instrument).ok_or_else(|| {
                warn!(
                    "Rejected {kind} '{name}' in context '{}': already registered as {found}",
                    self.inner.name
                );
                Error::DuplicateMetricName {
                    context: self.inner.name.clone(),
                    name: name.to_string(),
                    existing: found,
                    requested: kind,
                }
            });
        }

        let instrument = create(&self.inner.shared.config)?;
        instrument.start(&self.inner.shared.scheduler)?;
        let handle = existing(&instrument).ok_or_else(|| {
            Error::invalid_argument(format!("instrument created for '{name}' is not a {kind}"))
        })?;
        state.metrics.insert(
            name.to_string(),
            Registration {
                instrument,
                unit: options.unit.clone(),
                tags: options.tags.clone(),
            },
        );
        debug!("Registered {kind} '{name}' in context '{}'", self.inner.name);
        Ok(handle)
    }

    fn check_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            warn!("Access to metric context '{}' after shutdown", self.inner.name);
            return Err(Error::DisposedContextAccess {
                context: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    /// Shuts down this context and its subtree, then detaches it from its
    /// parent.
    ///
    /// Blocks until every background task of the subtree has stopped.
    /// Calling it again is a no-op.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "MetricContext::shutdown", skip(self), fields(context = %self.inner.name))
    )]
    pub fn shutdown(&self) {
        if !self.inner.dispose() {
            return;
        }

        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            let removed = {
                let mut state = parent.state.lock();
                let is_self = state
                    .children
                    .get(&self.inner.name)
                    .is_some_and(|child| Arc::ptr_eq(&child.inner, &self.inner));
                if is_self {
                    state.children.remove(&self.inner.name)
                } else {
                    None
                }
            };
            drop(removed);
        }
        info!("Metric context '{}' shut down", self.inner.name);
    }

    /// Detaches the child called `name` and shuts it down. Returns `false`
    /// when there is no such child.
    pub fn shutdown_context(&self, name: &str) -> bool {
        let child = self.inner.state.lock().children.remove(name);
        match child {
            Some(child) => {
                child.shutdown();
                true
            }
            None => false,
        }
    }

    /// Captures the current value of every metric in the subtree.
    ///
    /// Values are computed after the context lock is released, so a slow
    /// gauge provider never blocks registration. Children shut down while the
    /// enumeration is in progress are left out.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "MetricContext::enumerate_metrics", skip(self), fields(context = %self.inner.name))
    )]
    pub fn enumerate_metrics(&self) -> Result<MetricsData> {
        let (registrations, children) = {
            let state = self.inner.state.lock();
            self.check_not_disposed()?;
            let registrations: Vec<(String, Registration)> = state
                .metrics
                .iter()
                .map(|(name, registration)| (name.clone(), registration.clone()))
                .collect();
            let children: Vec<MetricContext> = state.children.values().cloned().collect();
            (registrations, children)
        };

        let timestamp = SystemTime::now();
        let metrics = registrations
            .into_iter()
            .map(|(name, registration)| MetricEntry {
                name,
                kind: registration.instrument.kind(),
                value: registration.instrument.value(),
                unit: registration.unit,
                tags: registration.tags,
            })
            .collect();
        let children = children
            .iter()
            .filter_map(|child| child.enumerate_metrics().ok())
            .collect();

        Ok(MetricsData {
            context: self.inner.name.clone(),
            timestamp,
            metrics,
            children,
        })
    }

    /// Resets every resettable instrument of the subtree. Gauges are left alone.
    pub fn reset_values(&self) -> Result<()> {
        let (instruments, children) = {
            let state = self.inner.state.lock();
            self.check_not_disposed()?;
            let instruments: Vec<Instrument> = state
                .metrics
                .values()
                .map(|registration| registration.instrument.clone())
                .collect();
            let children: Vec<MetricContext> = state.children.values().cloned().collect();
            (instruments, children)
        };

        for instrument in &instruments {
            instrument.reset();
        }
        for child in &children {
            // A child shut down concurrently has nothing left to reset.
            let _ = child.reset_values();
        }
        Ok(())
    }

    /// Runs the configured health status provider.
    ///
    /// Returns `Ok(None)` when no provider is configured. A panicking
    /// provider is reported to the error handler and yields an unhealthy
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisposedContextAccess`] after shutdown.
    pub fn health_status(&self) -> Result<Option<HealthStatus>> {
        self.check_not_disposed()?;
        let config = &self.inner.shared.config;
        let Some(provider) = config.health_status.as_ref() else {
            return Ok(None);
        };
        let status = match panic::catch_unwind(AssertUnwindSafe(|| provider())) {
            Ok(status) => status,
            Err(payload) => {
                let details = panic_message(payload.as_ref());
                config.handle_error(&Error::Provider {
                    metric: "health_status".to_string(),
                    details: details.clone(),
                });
                HealthStatus::from_results(vec![HealthCheckResult::unhealthy(
                    "health_status",
                    details,
                )])
            }
        };
        Ok(Some(status))
    }
}

impl ContextInner {
    /// Marks the node disposed and releases the subtree. Returns `false` if
    /// it was already disposed.
    fn dispose(&self) -> bool {
        let (children, metrics) = {
            let mut state = self.state.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return false;
            }
            (mem::take(&mut state.children), mem::take(&mut state.metrics))
        };

        for child in children.values() {
            child.inner.dispose();
        }
        for registration in metrics.values() {
            registration.instrument.stop();
        }
        if self.parent.is_none() {
            self.shared.scheduler.shutdown();
        }
        debug!(
            "Disposed metric context '{}' ({} children, {} metrics)",
            self.name,
            children.len(),
            metrics.len()
        );
        true
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.dispose();
    }
}
