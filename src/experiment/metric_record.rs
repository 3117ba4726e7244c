//! Metric Record - one row of training progress per iteration

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric Record represents the result of a single training iteration.
///
/// Append-only: records are never mutated after insertion, and a run's
/// records are inserted in iteration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    iteration: u64,
    loss: f64,
    source_id: String,
    duration_secs: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Create a new metric record stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `run_id` - ID of the parent run
    /// * `iteration` - Iteration that produced the loss
    /// * `loss` - Reduced training loss
    /// * `source_id` - Source of the batch the step consumed
    /// * `duration` - Wall-clock time of the step
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        iteration: u64,
        loss: f64,
        source_id: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self::builder(run_id, iteration, loss, source_id, duration).build()
    }

    /// Create a builder for constructing a metric record with optional fields.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        iteration: u64,
        loss: f64,
        source_id: impl Into<String>,
        duration: Duration,
    ) -> MetricRecordBuilder {
        MetricRecordBuilder::new(run_id, iteration, loss, source_id, duration)
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the iteration number.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Get the training loss.
    #[must_use]
    pub const fn loss(&self) -> f64 {
        self.loss
    }

    /// Get the batch source ID.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Get the step duration in seconds.
    #[must_use]
    pub const fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    run_id: String,
    iteration: u64,
    loss: f64,
    source_id: String,
    duration_secs: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        iteration: u64,
        loss: f64,
        source_id: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            iteration,
            loss,
            source_id: source_id.into(),
            duration_secs: duration.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        MetricRecord {
            run_id: self.run_id,
            iteration: self.iteration,
            loss: self.loss,
            source_id: self.source_id,
            duration_secs: self.duration_secs,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_record_new() {
        let metric = MetricRecord::new("run-1", 3, 0.5, "fridge", Duration::from_millis(250));
        assert_eq!(metric.run_id(), "run-1");
        assert_eq!(metric.iteration(), 3);
        assert_eq!(metric.source_id(), "fridge");
        assert!((metric.loss() - 0.5).abs() < f64::EPSILON);
        assert!((metric.duration_secs() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_metric_record_custom_timestamp() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let metric = MetricRecord::builder("run-1", 0, 1.0, "a", Duration::ZERO)
            .timestamp(ts)
            .build();
        assert_eq!(metric.timestamp(), ts);
    }
}
