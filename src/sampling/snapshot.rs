// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};

use super::{Sample, UserValue};

/// Immutable, sorted statistical view over a reservoir's samples.
///
/// Values are stored in ascending order together with their normalized
/// weights (which sum to 1) and the cumulative weight preceding each value.
/// Unweighted reservoirs produce snapshots where every value carries the
/// same weight, so both cases share a single set of formulas.
///
/// # Example
///
/// ```rust
/// use rsmetrics::Snapshot;
///
/// let snapshot = Snapshot::from_weighted(&[5, 1, 2, 3, 4], &[1.0, 2.0, 3.0, 2.0, 2.0])?;
/// assert_eq!(snapshot.median(), 3.0);
/// assert_eq!(snapshot.values(), &[1, 2, 3, 4, 5]);
/// assert!(snapshot.value(1.5).is_err());
/// # Ok::<(), rsmetrics::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    count: u64,
    values: Vec<i64>,
    norm_weights: Vec<f64>,
    quantiles: Vec<f64>,
    min_user_value: Option<UserValue>,
    max_user_value: Option<UserValue>,
}

impl Snapshot {
    /// A snapshot holding no values.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from reservoir samples.
    ///
    /// `count` is the total number of observations the reservoir has seen,
    /// which may exceed the number of samples it still holds.
    pub fn from_samples(count: u64, mut samples: Vec<Sample>) -> Self {
        if samples.is_empty() {
            return Self {
                count,
                ..Self::default()
            };
        }

        samples.sort_by_key(|sample| sample.value);
        let total_weight: f64 = samples.iter().map(|sample| sample.weight).sum();

        let mut values = Vec::with_capacity(samples.len());
        let mut norm_weights = Vec::with_capacity(samples.len());
        let mut quantiles = Vec::with_capacity(samples.len());
        let mut cumulative = 0.0;
        for sample in &samples {
            let weight = if total_weight > 0.0 {
                sample.weight / total_weight
            } else {
                0.0
            };
            values.push(sample.value);
            norm_weights.push(weight);
            quantiles.push(cumulative);
            cumulative += weight;
        }

        let min_user_value = samples.first().and_then(|s| s.user_value.clone());
        let max_user_value = samples.last().and_then(|s| s.user_value.clone());

        Self {
            count,
            values,
            norm_weights,
            quantiles,
            min_user_value,
            max_user_value,
        }
    }

    /// Builds a snapshot where every value has the same weight.
    pub fn from_values(values: impl IntoIterator<Item = i64>) -> Self {
        let samples: Vec<Sample> = values
            .into_iter()
            .map(|value| Sample::unweighted(value, None))
            .collect();
        Self::from_samples(samples.len() as u64, samples)
    }

    /// Builds a snapshot from parallel value and weight slices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the slices differ in length or a
    /// weight is not a finite number greater than zero.
    pub fn from_weighted(values: &[i64], weights: &[f64]) -> Result<Self> {
        if values.len() != weights.len() {
            return Err(Error::invalid_argument(format!(
                "values and weights must have the same number of elements ({} != {})",
                values.len(),
                weights.len()
            )));
        }
        if let Some(weight) = weights.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(Error::invalid_argument(format!(
                "sample weight must be finite and greater than zero, got {weight}"
            )));
        }

        let samples = values
            .iter()
            .zip(weights)
            .map(|(&value, &weight)| Sample::new(value, None, weight))
            .collect();
        Ok(Self::from_samples(values.len() as u64, samples))
    }

    /// Total number of observations recorded by the source reservoir.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of values in this snapshot.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Values in ascending order.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Normalized weights, parallel to [`values`](Self::values).
    pub fn weights(&self) -> &[f64] {
        &self.norm_weights
    }

    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    /// User value attached to the smallest sample.
    pub fn min_user_value(&self) -> Option<&UserValue> {
        self.min_user_value.as_ref()
    }

    /// User value attached to the largest sample.
    pub fn max_user_value(&self) -> Option<&UserValue> {
        self.max_user_value.as_ref()
    }

    /// Weighted arithmetic mean, 0 for an empty snapshot.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values
            .iter()
            .zip(&self.norm_weights)
            .map(|(&value, weight)| value as f64 * weight)
            .sum()
    }

    /// Weighted standard deviation, 0 for one value or fewer.
    pub fn std_dev(&self) -> f64 {
        if self.values.len() <= 1 {
            return 0.0;
        }

        let mean = self.mean();
        let variance: f64 = self
            .values
            .iter()
            .zip(&self.norm_weights)
            .map(|(&value, weight)| {
                let diff = value as f64 - mean;
                weight * diff * diff
            })
            .sum();
        variance.sqrt()
    }

    /// Returns the value at `quantile`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `quantile` is NaN or outside `[0, 1]`.
    pub fn value(&self, quantile: f64) -> Result<f64> {
        if quantile.is_nan() || !(0.0..=1.0).contains(&quantile) {
            return Err(Error::invalid_argument(format!(
                "quantile {quantile} is not in [0..1]"
            )));
        }
        Ok(self.value_at(quantile))
    }

    pub fn median(&self) -> f64 {
        self.value_at(0.5)
    }

    pub fn percentile_75(&self) -> f64 {
        self.value_at(0.75)
    }

    pub fn percentile_95(&self) -> f64 {
        self.value_at(0.95)
    }

    pub fn percentile_98(&self) -> f64 {
        self.value_at(0.98)
    }

    pub fn percentile_99(&self) -> f64 {
        self.value_at(0.99)
    }

    pub fn percentile_999(&self) -> f64 {
        self.value_at(0.999)
    }

    // Caller guarantees quantile is within [0, 1].
    fn value_at(&self, quantile: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        // Greatest index whose preceding cumulative weight is <= quantile.
        let position = match self
            .quantiles
            .binary_search_by(|cumulative| cumulative.total_cmp(&quantile))
        {
            Ok(index) => index,
            Err(insertion) => insertion.saturating_sub(1),
        };
        let index = position.min(self.values.len() - 1);
        self.values[index] as f64
    }
}
