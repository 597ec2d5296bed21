// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use serde::Serialize;

use crate::metrics::{MetricKind, MetricTags, MetricValue, Unit};

/// Point-in-time view of a context subtree, as returned by
/// [`MetricContext::enumerate_metrics`](crate::MetricContext::enumerate_metrics).
///
/// Nothing in here refers back to live instruments; reporters may keep,
/// serialize or ship it freely.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsData {
    pub context: String,
    pub timestamp: SystemTime,
    /// Metrics registered directly in this context, ordered by name.
    pub metrics: Vec<MetricEntry>,
    /// One entry per child context, ordered by name.
    pub children: Vec<MetricsData>,
}

/// One registered metric with its metadata and current value.
#[derive(Debug, Clone, Serialize)]
pub struct MetricEntry {
    pub name: String,
    pub kind: MetricKind,
    pub unit: Unit,
    pub tags: MetricTags,
    pub value: MetricValue,
}

impl MetricsData {
    /// Looks up a metric registered directly in this context.
    pub fn metric(&self, name: &str) -> Option<&MetricEntry> {
        self.metrics.iter().find(|entry| entry.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&MetricsData> {
        self.children.iter().find(|child| child.context == name)
    }

    /// Every metric of the subtree keyed by its dotted path, e.g.
    /// `"app.db.queries"`, depth first.
    pub fn flatten(&self) -> Vec<(String, &MetricEntry)> {
        let mut flat = Vec::new();
        self.flatten_into(&self.context, &mut flat);
        flat
    }

    fn flatten_into<'a>(&'a self, prefix: &str, flat: &mut Vec<(String, &'a MetricEntry)>) {
        for entry in &self.metrics {
            flat.push((format!("{prefix}.{}", entry.name), entry));
        }
        for child in &self.children {
            child.flatten_into(&format!("{prefix}.{}", child.context), flat);
        }
    }
}
