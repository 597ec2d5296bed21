// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Configuration applied once when a root [`MetricContext`](crate::MetricContext)
//! is created. Child contexts share the configuration of their root.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::health::HealthStatusProvider;
use crate::sampling::{SamplingType, DEFAULT_DECAY_ALPHA, DEFAULT_RESERVOIR_SIZE};

/// Receives failures that happen on instrument read paths, such as a gauge
/// provider panicking. Instruments never propagate those to their caller.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Decay constants of reservoirs and meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayConfig {
    /// Decay factor of exponentially decaying reservoirs.
    pub alpha: f64,
    /// How often decaying reservoirs rescale their priorities.
    pub rescale_interval: Duration,
    /// How often meters fold new marks into their moving averages.
    pub tick_interval: Duration,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_DECAY_ALPHA,
            rescale_interval: Duration::from_secs(60 * 60),
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// Every option recognized by a metrics tree.
///
/// # Example
///
/// ```rust
/// use rsmetrics::{MetricContext, MetricsConfig, SamplingType};
///
/// let config = MetricsConfig {
///     default_sampling: SamplingType::SlidingWindow { size: 256 },
///     ..MetricsConfig::default()
/// };
/// let root = MetricContext::with_config("app", config);
/// # root.shutdown();
/// ```
#[derive(Clone)]
pub struct MetricsConfig {
    /// Endpoint prefix advertised to external HTTP reporters. The crate itself
    /// serves nothing.
    pub http_endpoint_prefix: Option<String>,
    /// Health status provider exposed through
    /// [`MetricContext::health_status`](crate::MetricContext::health_status).
    pub health_status: Option<HealthStatusProvider>,
    /// Handler for producer-path failures; logs them when `None`.
    pub error_handler: Option<ErrorHandler>,
    pub decay: DecayConfig,
    /// Sampling used when a histogram or timer asks for [`SamplingType::Default`].
    pub default_sampling: SamplingType,
    pub default_reservoir_size: usize,
    pub clock: Arc<dyn Clock>,
    /// Name of the thread driving periodic tasks.
    pub scheduler_thread_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            http_endpoint_prefix: None,
            health_status: None,
            error_handler: None,
            decay: DecayConfig::default(),
            default_sampling: SamplingType::Default,
            default_reservoir_size: DEFAULT_RESERVOIR_SIZE,
            clock: Arc::new(SystemClock::new()),
            scheduler_thread_name: "rsmetrics-scheduler".to_string(),
        }
    }
}

impl fmt::Debug for MetricsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsConfig")
            .field("http_endpoint_prefix", &self.http_endpoint_prefix)
            .field("health_status", &self.health_status.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("decay", &self.decay)
            .field("default_sampling", &self.default_sampling)
            .field("default_reservoir_size", &self.default_reservoir_size)
            .field("clock", &self.clock)
            .field("scheduler_thread_name", &self.scheduler_thread_name)
            .finish()
    }
}

impl MetricsConfig {
    /// Hands a producer-path failure to the configured handler.
    pub(crate) fn handle_error(&self, err: &Error) {
        match &self.error_handler {
            Some(handler) => handler(err),
            None => error!("Unhandled metrics error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.decay.alpha, 0.015);
        assert_eq!(config.decay.tick_interval, Duration::from_secs(5));
        assert_eq!(config.decay.rescale_interval, Duration::from_secs(3600));
        assert_eq!(config.default_reservoir_size, 1028);
        assert!(config.error_handler.is_none());
    }

    #[test]
    fn test_configured_error_handler_receives_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let config = MetricsConfig {
            error_handler: Some(Arc::new(move |_err: &Error| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..MetricsConfig::default()
        };

        config.handle_error(&Error::invalid_argument("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_hides_closures() {
        let text = format!("{:?}", MetricsConfig::default());
        assert!(text.contains("MetricsConfig"));
        assert!(text.contains("error_handler: false"));
    }
}
