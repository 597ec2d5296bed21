// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Signed atomic counter.
///
/// Besides the total, a counter can track sub-counts per item (for example
/// per status code); every item increment also moves the total.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

#[derive(Debug, Default)]
struct CounterInner {
    count: AtomicI64,
    items: Mutex<BTreeMap<String, i64>>,
}

/// One item of a [`CounterValue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterItem {
    pub item: String,
    pub count: i64,
    /// Share of the counter's total, in percent.
    pub percent: f64,
}

/// Point-in-time value of a [`Counter`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CounterValue {
    pub count: i64,
    pub items: Vec<CounterItem>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment(&self) {
        self.increment_by(1);
    }

    #[inline]
    pub fn increment_by(&self, amount: i64) {
        self.inner.count.fetch_add(amount, Ordering::Relaxed);
    }

    #[inline]
    pub fn decrement(&self) {
        self.increment_by(-1);
    }

    #[inline]
    pub fn decrement_by(&self, amount: i64) {
        self.increment_by(-amount);
    }

    /// Adds `amount` to both the total and the sub-count of `item`.
    pub fn increment_item(&self, item: &str, amount: i64) {
        {
            let mut items = self.inner.items.lock();
            match items.get_mut(item) {
                Some(count) => *count += amount,
                None => {
                    items.insert(item.to_string(), amount);
                }
            }
        }
        self.increment_by(amount);
    }

    /// Subtracts `amount` from both the total and the sub-count of `item`.
    pub fn decrement_item(&self, item: &str, amount: i64) {
        self.increment_item(item, -amount);
    }

    pub fn count(&self) -> i64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    pub fn value(&self) -> CounterValue {
        let items = self.inner.items.lock();
        let count = self.count();
        CounterValue {
            count,
            items: items
                .iter()
                .map(|(item, &item_count)| CounterItem {
                    item: item.clone(),
                    count: item_count,
                    percent: if count > 0 {
                        item_count as f64 / count as f64 * 100.0
                    } else {
                        0.0
                    },
                })
                .collect(),
        }
    }

    pub fn reset(&self) {
        let mut items = self.inner.items.lock();
        items.clear();
        self.inner.count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_decrement() {
        let counter = Counter::new();
        counter.increment();
        counter.increment_by(10);
        counter.decrement_by(3);
        counter.decrement();

        assert_eq!(counter.count(), 7);
        assert!(counter.value().items.is_empty());
    }

    #[test]
    fn test_items_and_percentages() {
        let counter = Counter::new();
        counter.increment_item("200", 3);
        counter.increment_item("500", 1);

        let value = counter.value();
        assert_eq!(value.count, 4);
        assert_eq!(value.items.len(), 2);
        assert_eq!(value.items[0].item, "200");
        assert_eq!(value.items[0].percent, 75.0);
        assert_eq!(value.items[1].percent, 25.0);

        counter.decrement_item("500", 1);
        assert_eq!(counter.value().items[1].count, 0);
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn test_clones_share_state() {
        let counter = Counter::new();
        let clone = counter.clone();
        clone.increment_by(5);
        assert_eq!(counter.count(), 5);

        counter.reset();
        assert_eq!(clone.value(), CounterValue::default());
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = Counter::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.count(), 8000);
    }
}
