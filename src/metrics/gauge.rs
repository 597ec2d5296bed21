// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::error;

use crate::config::MetricsConfig;
use crate::error::{panic_message, Error};

/// Function sampled by a [`Gauge`] on every read.
pub type ValueProvider = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Pull-based metric whose value is computed on demand.
///
/// A provider that panics never takes the reader down: the panic is caught,
/// reported to the context's error handler (or logged), and the read yields
/// `f64::NAN`.
#[derive(Clone)]
pub struct Gauge {
    inner: Arc<GaugeInner>,
}

struct GaugeInner {
    name: String,
    provider: ValueProvider,
    config: Option<Arc<MetricsConfig>>,
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Gauge {
    /// Creates a standalone gauge; provider failures are logged.
    pub fn new<F>(name: impl Into<String>, provider: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::build(name.into(), Arc::new(provider), None)
    }

    /// Gauge reporting `numerator / denominator`, `NaN` when the denominator is 0.
    pub fn ratio<N, D>(name: impl Into<String>, numerator: N, denominator: D) -> Self
    where
        N: Fn() -> f64 + Send + Sync + 'static,
        D: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::build(name.into(), ratio_provider(numerator, denominator), None)
    }

    pub(crate) fn build(
        name: String,
        provider: ValueProvider,
        config: Option<Arc<MetricsConfig>>,
    ) -> Self {
        Self {
            inner: Arc::new(GaugeInner {
                name,
                provider,
                config,
            }),
        }
    }

    /// Samples the provider.
    pub fn value(&self) -> f64 {
        let provider = &self.inner.provider;
        match panic::catch_unwind(AssertUnwindSafe(|| provider())) {
            Ok(value) => value,
            Err(payload) => {
                let err = Error::Provider {
                    metric: self.inner.name.clone(),
                    details: panic_message(payload.as_ref()),
                };
                match &self.inner.config {
                    Some(config) => config.handle_error(&err),
                    None => error!("{err}"),
                }
                f64::NAN
            }
        }
    }
}

pub(crate) fn ratio_provider<N, D>(numerator: N, denominator: D) -> ValueProvider
where
    N: Fn() -> f64 + Send + Sync + 'static,
    D: Fn() -> f64 + Send + Sync + 'static,
{
    Arc::new(move || {
        let denominator = denominator();
        if denominator == 0.0 {
            f64::NAN
        } else {
            numerator() / denominator
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_gauge_reads_provider() {
        let source = Arc::new(AtomicUsize::new(3));
        let reader = source.clone();
        let gauge = Gauge::new("queue", move || reader.load(Ordering::Relaxed) as f64);

        assert_eq!(gauge.value(), 3.0);
        source.store(7, Ordering::Relaxed);
        assert_eq!(gauge.value(), 7.0);
    }

    #[test]
    fn test_ratio_gauge() {
        assert_eq!(Gauge::ratio("hits", || 1.0, || 4.0).value(), 0.25);
        assert!(Gauge::ratio("hits", || 1.0, || 0.0).value().is_nan());
    }

    #[test]
    fn test_panicking_provider_reports_error() {
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = failures.clone();
        let config = MetricsConfig {
            error_handler: Some(Arc::new(move |err: &Error| {
                assert!(matches!(err, Error::Provider { metric, .. } if metric == "broken"));
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..MetricsConfig::default()
        };

        let gauge = Gauge::build(
            "broken".to_string(),
            Arc::new(|| -> f64 { panic!("sensor offline") }),
            Some(Arc::new(config)),
        );

        assert!(gauge.value().is_nan());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }
}
