// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Exponentially-weighted moving average of an event rate.
///
/// Fed once per tick with the number of events seen during that tick. The
/// first tick seeds the average with the instantaneous rate.
#[derive(Debug, Clone)]
pub(crate) struct Ewma {
    alpha: f64,
    interval_secs: f64,
    /// Events per second.
    rate: f64,
    initialized: bool,
}

impl Ewma {
    pub(crate) fn new(window: Duration, tick_interval: Duration) -> Self {
        let interval_secs = tick_interval.as_secs_f64();
        Self {
            alpha: 1.0 - (-interval_secs / window.as_secs_f64()).exp(),
            interval_secs,
            rate: 0.0,
            initialized: false,
        }
    }

    pub(crate) fn one_minute(tick_interval: Duration) -> Self {
        Self::new(ONE_MINUTE, tick_interval)
    }

    pub(crate) fn five_minutes(tick_interval: Duration) -> Self {
        Self::new(FIVE_MINUTES, tick_interval)
    }

    pub(crate) fn fifteen_minutes(tick_interval: Duration) -> Self {
        Self::new(FIFTEEN_MINUTES, tick_interval)
    }

    pub(crate) fn tick(&mut self, count: u64) {
        let instant_rate = count as f64 / self.interval_secs;
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Current rate in events per second.
    pub(crate) fn rate(&self) -> f64 {
        self.rate
    }

    pub(crate) fn reset(&mut self) {
        self.rate = 0.0;
        self.initialized = false;
    }
}
