// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;

use super::{check_capacity, Reservoir, Sample, Snapshot, UserValue};

/// Reservoir holding exactly the last `capacity` observations.
#[derive(Debug)]
pub struct SlidingWindowReservoir {
    capacity: usize,
    count: AtomicU64,
    window: Mutex<VecDeque<Sample>>,
}

impl SlidingWindowReservoir {
    /// Creates a window of `capacity` observations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) for a
    /// zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        Ok(Self {
            capacity,
            count: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Reservoir for SlidingWindowReservoir {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn size(&self) -> usize {
        self.window.lock().len()
    }

    fn update(&self, value: i64, user_value: Option<UserValue>) {
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(Sample::unweighted(value, user_value));
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Snapshot {
        let samples: Vec<Sample> = self.window.lock().iter().cloned().collect();
        Snapshot::from_samples(self.count(), samples)
    }

    fn reset(&self) {
        let mut window = self.window.lock();
        window.clear();
        self.count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holds_fewer_than_capacity() {
        let reservoir = SlidingWindowReservoir::new(3).unwrap();
        reservoir.update(1, None);
        reservoir.update(2, None);

        assert_eq!(reservoir.snapshot().values(), &[1, 2]);
    }

    #[test]
    fn test_keeps_only_the_last_values() {
        let reservoir = SlidingWindowReservoir::new(3).unwrap();
        for value in [9, 1, 2, 3, 4, 5] {
            reservoir.update(value, None);
        }

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.values(), &[3, 4, 5]);
        assert_eq!(snapshot.count(), 6);
        assert_eq!(reservoir.size(), 3);
    }

    #[test]
    fn test_newest_user_value_survives() {
        let reservoir = SlidingWindowReservoir::new(2).unwrap();
        reservoir.update(100, Some("old".into()));
        reservoir.update(1, Some("a".into()));
        reservoir.update(50, Some("b".into()));

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.values(), &[1, 50]);
        assert_eq!(snapshot.max_user_value().map(|v| &**v), Some("b"));
    }
}
