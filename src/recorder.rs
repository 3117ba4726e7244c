//! Run Recorder - best-effort persistence of per-iteration progress
//!
//! Training progress is the primary invariant; metrics are best effort.
//! Store failures are logged and counted, never propagated into the loop.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::experiment::{fields, MetricRecord, RunStatus, RunStore, ValidationRecord};
use crate::Result;

/// Writes one run's records to a [`RunStore`].
///
/// Every call is synchronous on the loop thread, so rows land in the store
/// in iteration order.
pub struct RunRecorder {
    store: Arc<dyn RunStore>,
    run_id: String,
    store_errors: u64,
}

impl RunRecorder {
    /// Create a recorder for `run_id`.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            store_errors: 0,
        }
    }

    /// Run this recorder writes to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of store calls that failed so far.
    #[must_use]
    pub const fn store_errors(&self) -> u64 {
        self.store_errors
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    fn absorb(&mut self, operation: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.store_errors += 1;
                tracing::warn!(
                    run_id = %self.run_id,
                    operation,
                    error = %e,
                    store_errors = self.store_errors,
                    "run store call failed; continuing"
                );
                false
            }
        }
    }

    /// Append a metric row. Returns whether the store accepted it.
    pub fn record_metric(&mut self, record: &MetricRecord) -> bool {
        let result = self.store.insert_metric(record);
        self.absorb("insert_metric", result)
    }

    /// Persist a learning-rate change for `iteration` (idempotent upsert).
    pub fn record_learning_rate_change(&mut self, iteration: u64, rate: f64) -> bool {
        let result = self
            .store
            .upsert_run_field(&self.run_id, &fields::learning_rate_at(iteration), json!(rate))
            .and_then(|()| {
                self.store
                    .upsert_run_field(&self.run_id, fields::LEARNING_RATE, json!(rate))
            });
        self.absorb("record_learning_rate_change", result)
    }

    /// Persist the last completed iteration.
    pub fn record_progress(&mut self, iteration: u64) -> bool {
        let result = self
            .store
            .upsert_run_field(&self.run_id, fields::ITERATION, json!(iteration));
        self.absorb("record_progress", result)
    }

    /// Persist a new best training cost.
    pub fn record_best_cost(&mut self, cost: f64) -> bool {
        let result = self
            .store
            .upsert_run_field(&self.run_id, fields::BEST_COST, json!(cost));
        self.absorb("record_best_cost", result)
    }

    /// Persist a status transition, stamping start/end times.
    ///
    /// Entering `Running` clears a stale `ended_at` left by an earlier invocation.
    pub fn record_status(&mut self, status: RunStatus) -> bool {
        let now = json!(Utc::now());
        let stamps = if status == RunStatus::Running {
            vec![(fields::STARTED_AT, now), (fields::ENDED_AT, serde_json::Value::Null)]
        } else {
            vec![(fields::ENDED_AT, now)]
        };
        let result = serde_json::to_value(status)
            .map_err(Into::into)
            .and_then(|value| self.store.upsert_run_field(&self.run_id, fields::STATUS, value))
            .and_then(|()| {
                stamps.into_iter().try_for_each(|(field, value)| {
                    self.store.upsert_run_field(&self.run_id, field, value)
                })
            });
        self.absorb("record_status", result)
    }

    /// Append a validation row.
    pub fn record_validation(&mut self, record: &ValidationRecord) -> bool {
        let result = self.store.insert_validation(record);
        self.absorb("insert_validation", result)
    }
}
