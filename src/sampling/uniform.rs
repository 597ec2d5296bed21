// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;

use crate::error::Result;

use super::{check_capacity, Reservoir, Sample, Snapshot, UserValue};

/// Random sampling reservoir (Vitter's algorithm R).
///
/// The first `capacity` observations are kept unconditionally. Afterwards the
/// n-th observation replaces a uniformly chosen slot with probability
/// `capacity / n`, so every observation seen so far is retained with the same
/// probability. Suited to long-running histograms where the whole history
/// matters equally.
#[derive(Debug)]
pub struct UniformReservoir {
    capacity: usize,
    count: AtomicU64,
    samples: Mutex<Vec<Sample>>,
}

impl UniformReservoir {
    /// Creates a reservoir holding at most `capacity` samples.
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
            samples: Mutex::new(Vec::with_capacity(capacity)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Reservoir for UniformReservoir {
    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn size(&self) -> usize {
        self.samples.lock().len()
    }

    fn update(&self, value: i64, user_value: Option<UserValue>) {
        let sample = Sample::unweighted(value, user_value);
        let mut samples = self.samples.lock();
        // Incremented under the lock so the replacement probability matches
        // the observation's position in the stream.
        let seen = self.count.fetch_add(1, Ordering::Relaxed) + 1;

        if samples.len() < self.capacity {
            samples.push(sample);
            return;
        }

        let slot = rand::rng().random_range(0..seen);
        if slot < self.capacity as u64 {
            samples[slot as usize] = sample;
        }
    }

    fn snapshot(&self) -> Snapshot {
        let samples = self.samples.lock().clone();
        Snapshot::from_samples(self.count(), samples)
    }

    fn reset(&self) {
        let mut samples = self.samples.lock();
        samples.clear();
        self.count.store(0, Ordering::Relaxed);
    }
}
