// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Time sources used by reservoirs, meters and timers.
//!
//! Instruments never read the system time directly; they ask the [`Clock`]
//! handed to them by their owning context. Production code uses
//! [`SystemClock`], tests use [`ManualClock`] to move time forward
//! deterministically (for example to force a reservoir rescale).

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub(crate) const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// A monotonic time source.
pub trait Clock: Send + Sync + Debug {
    /// Nanoseconds elapsed since the clock's origin.
    fn nanoseconds(&self) -> u64;

    /// Whole seconds elapsed since the clock's origin.
    fn seconds(&self) -> u64 {
        self.nanoseconds() / NANOS_PER_SECOND
    }
}

/// Clock backed by [`Instant`], anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn nanoseconds(&self) -> u64 {
        self.origin.elapsed().as_nanos().min(u64::MAX as u128) as u64
    }
}

/// Clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use rsmetrics::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_secs(90));
/// assert_eq!(clock.seconds(), 90);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = by.as_nanos().min(u64::MAX as u128) as u64;
        let _ = self
            .nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Sets the absolute reading of the clock.
    pub fn set(&self, nanoseconds: u64) {
        self.nanos.store(nanoseconds, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn nanoseconds(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.nanoseconds();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.nanoseconds() > first);
    }

    #[test]
    fn test_manual_clock_advance_and_set() {
        let clock = ManualClock::new();
        assert_eq!(clock.nanoseconds(), 0);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.nanoseconds(), 1_500_000_000);
        assert_eq!(clock.seconds(), 1);

        clock.set(10 * NANOS_PER_SECOND);
        assert_eq!(clock.seconds(), 10);
    }
}
