// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Health status as consumed by reporters.
//!
//! Health checks themselves are scheduled and evaluated outside this crate.
//! A context only stores the provider function configured in
//! [`MetricsConfig::health_status`](crate::MetricsConfig::health_status) and
//! calls it on behalf of reporters.

use std::sync::Arc;

use serde::Serialize;

/// Function returning the current health of the application.
pub type HealthStatusProvider = Arc<dyn Fn() -> HealthStatus + Send + Sync>;

/// Outcome of a single named health check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub is_healthy: bool,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_healthy: true,
            message: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_healthy: false,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health of the application.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub results: Vec<HealthCheckResult>,
}

impl HealthStatus {
    /// Healthy only if every check is healthy; an empty set is healthy.
    pub fn from_results(results: Vec<HealthCheckResult>) -> Self {
        Self {
            is_healthy: results.iter().all(|result| result.is_healthy),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_results() {
        assert!(HealthStatus::from_results(Vec::new()).is_healthy);

        let status = HealthStatus::from_results(vec![
            HealthCheckResult::healthy("database"),
            HealthCheckResult::unhealthy("cache", "connection refused"),
        ]);
        assert!(!status.is_healthy);
        assert_eq!(status.results.len(), 2);
    }
}
