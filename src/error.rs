// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

use crate::metrics::MetricKind;

/// Represents errors that can occur in the rsmetrics library.
///
/// Statistical and registry errors (bad quantiles, duplicate names, access
/// after shutdown) are programmer errors and are returned to the caller.
/// Failures on the producer path, such as a gauge provider panicking, are
/// never returned from the instrument; they are wrapped in
/// [`Error::Provider`] and handed to the configured
/// [`ErrorHandler`](crate::ErrorHandler) instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An argument was outside of its accepted domain, e.g. a quantile
    /// outside `[0, 1]` or a zero reservoir capacity.
    #[error("Invalid argument: {details}")]
    InvalidArgument {
        /// Description of the offending argument
        details: String,
    },

    /// A metric name is already bound to a different kind in the same context.
    #[error("Metric '{name}' is already registered as {existing} in context '{context}', cannot register it as {requested}")]
    DuplicateMetricName {
        /// Name of the context holding the metric
        context: String,
        /// The conflicting metric name
        name: String,
        /// Kind the name is currently bound to
        existing: MetricKind,
        /// Kind the caller asked for
        requested: MetricKind,
    },

    /// The context was shut down before the operation was attempted.
    #[error("Metric context '{context}' has been shut down")]
    DisposedContextAccess {
        /// Name of the disposed context
        context: String,
    },

    /// A user supplied value provider failed while being sampled.
    #[error("Value provider for '{metric}' failed: {details}")]
    Provider {
        /// Name of the metric (or health check) whose provider failed
        metric: String,
        /// Panic payload or failure description
        details: String,
    },

    /// The background scheduler runtime could not be started.
    #[error("Failed to start metrics scheduler: {source}")]
    Scheduler {
        /// The underlying I/O error from the runtime builder
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn invalid_argument(details: impl Into<String>) -> Self {
        Error::InvalidArgument {
            details: details.into(),
        }
    }
}

/// A Result type specialized for rsmetrics operations.
///
/// # Examples
///
/// ```rust
/// use rsmetrics::Result;
///
/// fn percentile(snapshot: &rsmetrics::Snapshot) -> Result<f64> {
///     snapshot.value(0.9)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extracts a readable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_display() {
        let err = Error::DuplicateMetricName {
            context: "app".to_string(),
            name: "requests".to_string(),
            existing: MetricKind::Counter,
            requested: MetricKind::Meter,
        };
        let text = err.to_string();
        assert!(text.contains("requests"));
        assert!(text.contains("Counter"));
        assert!(text.contains("Meter"));
    }

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(payload.as_ref()), "owned message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
