// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Sampling engine
//!
//! A [`Reservoir`] keeps a bounded, statistically representative subset of an
//! unbounded stream of `i64` observations and turns it into an immutable
//! [`Snapshot`] on demand.
//!
//! # Variants
//!
//! - [`UniformReservoir`]: classic reservoir sampling, every observation seen so
//!   far has the same probability of being retained.
//! - [`SlidingWindowReservoir`]: exactly the last `capacity` observations.
//! - [`ExponentiallyDecayingReservoir`]: forward-decaying priority sampling that
//!   favours recent observations (roughly the last five minutes with the default
//!   decay factor).
//!
//! # Concurrency
//!
//! Every reservoir guards its samples with its own short-lived lock. Writers
//! never touch any registry-wide state, and snapshots are copied out under the
//! lock so they have no further dependency on the reservoir.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::MetricsConfig;
use crate::error::{Error, Result};

mod exponentially_decaying;
mod sliding_window;
mod snapshot;
mod uniform;

pub use exponentially_decaying::ExponentiallyDecayingReservoir;
pub use sliding_window::SlidingWindowReservoir;
pub use snapshot::Snapshot;
pub use uniform::UniformReservoir;

/// Opaque user payload attached to an observation, e.g. a request id.
pub type UserValue = Arc<str>;

/// Default number of samples kept by reservoirs created through a context.
pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;

/// Default decay factor of [`ExponentiallyDecayingReservoir`].
pub const DEFAULT_DECAY_ALPHA: f64 = 0.015;

/// A single observation held by a reservoir.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: i64,
    pub user_value: Option<UserValue>,
    /// Sampling weight, always finite and greater than zero.
    pub weight: f64,
}

impl Sample {
    pub fn new(value: i64, user_value: Option<UserValue>, weight: f64) -> Self {
        Self {
            value,
            user_value,
            weight,
        }
    }

    /// An observation with unit weight, as stored by unweighted reservoirs.
    pub fn unweighted(value: i64, user_value: Option<UserValue>) -> Self {
        Self::new(value, user_value, 1.0)
    }
}

/// Bounded-size store of observations.
pub trait Reservoir: Send + Sync + Debug {
    /// Number of observations recorded since creation or the last reset.
    fn count(&self) -> u64;

    /// Number of observations currently held, never above the capacity.
    fn size(&self) -> usize;

    /// Records an observation. Always succeeds.
    fn update(&self, value: i64, user_value: Option<UserValue>);

    /// Copies the currently held observations into an immutable snapshot.
    fn snapshot(&self) -> Snapshot;

    /// Drops every held observation and resets the count.
    fn reset(&self);

    /// Interval of the periodic maintenance the reservoir needs, if any.
    fn rescale_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic maintenance entry point, a no-op for most reservoirs.
    fn rescale_if_needed(&self) {}
}

/// Reservoir algorithm selection for histograms and timers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub enum SamplingType {
    /// Use the context's configured default (exponentially decaying unless
    /// overridden in [`MetricsConfig`]).
    #[default]
    Default,
    /// [`UniformReservoir`] with the given capacity.
    Uniform { size: usize },
    /// [`SlidingWindowReservoir`] with the given capacity.
    SlidingWindow { size: usize },
    /// [`ExponentiallyDecayingReservoir`] with the given capacity and decay factor.
    ExponentiallyDecaying { size: usize, alpha: f64 },
}

impl SamplingType {
    /// Resolves [`SamplingType::Default`] against a configuration.
    pub(crate) fn resolve(self, config: &MetricsConfig) -> SamplingType {
        match self {
            SamplingType::Default => match config.default_sampling {
                SamplingType::Default => SamplingType::ExponentiallyDecaying {
                    size: config.default_reservoir_size,
                    alpha: config.decay.alpha,
                },
                other => other,
            },
            other => other,
        }
    }

    /// Builds the reservoir described by this sampling type.
    pub(crate) fn build(
        self,
        config: &MetricsConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn Reservoir>> {
        let reservoir: Arc<dyn Reservoir> = match self.resolve(config) {
            SamplingType::Uniform { size } => Arc::new(UniformReservoir::new(size)?),
            SamplingType::SlidingWindow { size } => Arc::new(SlidingWindowReservoir::new(size)?),
            SamplingType::ExponentiallyDecaying { size, alpha } => {
                Arc::new(ExponentiallyDecayingReservoir::with_rescale_interval(
                    size,
                    alpha,
                    config.decay.rescale_interval,
                    clock,
                )?)
            }
            SamplingType::Default => {
                return Err(Error::invalid_argument(
                    "default sampling type must resolve to a concrete reservoir",
                ))
            }
        };
        Ok(reservoir)
    }
}

pub(crate) fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(Error::invalid_argument(
            "reservoir capacity must be greater than zero",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_default_sampling_resolves_to_decaying() {
        let config = MetricsConfig::default();
        match SamplingType::Default.resolve(&config) {
            SamplingType::ExponentiallyDecaying { size, alpha } => {
                assert_eq!(size, DEFAULT_RESERVOIR_SIZE);
                assert_eq!(alpha, DEFAULT_DECAY_ALPHA);
            }
            other => panic!("unexpected sampling type {other:?}"),
        }
    }

    #[test]
    fn test_configured_default_sampling_is_used() {
        let config = MetricsConfig {
            default_sampling: SamplingType::SlidingWindow { size: 8 },
            ..MetricsConfig::default()
        };
        assert_eq!(
            SamplingType::Default.resolve(&config),
            SamplingType::SlidingWindow { size: 8 }
        );
        assert_eq!(
            SamplingType::Uniform { size: 3 }.resolve(&config),
            SamplingType::Uniform { size: 3 }
        );
    }

    #[test]
    fn test_build_rejects_zero_capacity() {
        let config = MetricsConfig::default();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        for sampling in [
            SamplingType::Uniform { size: 0 },
            SamplingType::SlidingWindow { size: 0 },
            SamplingType::ExponentiallyDecaying { size: 0, alpha: 0.015 },
        ] {
            let result = sampling.build(&config, clock.clone());
            assert!(matches!(result, Err(Error::InvalidArgument { .. })));
        }
    }

    #[test]
    fn test_build_decaying_requests_rescale() {
        let config = MetricsConfig::default();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let reservoir = SamplingType::Default.build(&config, clock).unwrap();
        assert_eq!(reservoir.rescale_interval(), Some(config.decay.rescale_interval));

        let uniform = SamplingType::Uniform { size: 4 }
            .build(&config, Arc::new(ManualClock::new()))
            .unwrap();
        assert_eq!(uniform.rescale_interval(), None);
    }
}
