//! Run Record - one identified training attempt with persisted progress

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document field paths used for partial run updates.
pub mod fields {
    /// Last completed iteration.
    pub const ITERATION: &str = "iteration";
    /// Learning rate currently applied.
    pub const LEARNING_RATE: &str = "learning_rate";
    /// Learning-rate change log, keyed by iteration.
    pub const LEARNING_RATES: &str = "learning_rates";
    /// Lowest training cost so far.
    pub const BEST_COST: &str = "best_cost";
    /// Run status.
    pub const STATUS: &str = "status";
    /// Time the run was (re)started.
    pub const STARTED_AT: &str = "started_at";
    /// Time the run reached a terminal state.
    pub const ENDED_AT: &str = "ended_at";

    /// Path of the change-log entry for `iteration`.
    #[must_use]
    pub fn learning_rate_at(iteration: u64) -> String {
        format!("{LEARNING_RATES}.{iteration}")
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is created but not yet started.
    #[default]
    Pending,
    /// Iteration loop is executing.
    Running,
    /// Loop stopped at its iteration limit or on a deliberate stop.
    Stopped,
    /// Loss became NaN.
    Diverged,
    /// Operator interrupted the loop.
    Interrupted,
    /// Fatal model or data-source error.
    Failed,
    /// Operator aborted the run.
    Aborted,
}

/// Run Record represents a single training attempt.
///
/// `iteration` is the last *completed* iteration; a resumed loop starts at
/// `iteration + 1`. `best_cost` is stored as `None` while it is still +∞
/// because JSON has no infinity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    run_id: String,
    #[serde(default)]
    status: RunStatus,
    #[serde(default)]
    iteration: Option<u64>,
    #[serde(default)]
    learning_rate: Option<f64>,
    #[serde(default)]
    learning_rates: BTreeMap<u64, f64>,
    #[serde(default)]
    best_cost: Option<f64>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

impl RunRecord {
    /// Create a new run record in Pending status.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Pending,
            iteration: None,
            learning_rate: None,
            learning_rates: BTreeMap::new(),
            best_cost: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            config: None,
        }
    }

    /// Create a builder for constructing a run record with optional fields.
    #[must_use]
    pub fn builder(run_id: impl Into<String>) -> RunRecordBuilder {
        RunRecordBuilder::new(run_id)
    }

    /// Join identifier parts with `_` (e.g. `["e42", "kettle"]` → `"e42_kettle"`).
    #[must_use]
    pub fn id_from_parts<S: AsRef<str>>(parts: &[S]) -> String {
        parts
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Last completed iteration, if any.
    #[must_use]
    pub const fn iteration(&self) -> Option<u64> {
        self.iteration
    }

    /// Iteration the next loop invocation starts at.
    #[must_use]
    pub fn next_iteration(&self) -> u64 {
        self.iteration.map_or(0, |i| i + 1)
    }

    /// Learning rate currently applied, if one has been set.
    #[must_use]
    pub const fn learning_rate(&self) -> Option<f64> {
        self.learning_rate
    }

    /// Change log of applied learning rates, keyed by iteration.
    #[must_use]
    pub const fn learning_rates(&self) -> &BTreeMap<u64, f64> {
        &self.learning_rates
    }

    /// Lowest training cost seen so far (+∞ before the first step).
    #[must_use]
    pub fn best_cost(&self) -> f64 {
        self.best_cost.unwrap_or(f64::INFINITY)
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the (latest) start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp of the latest loop invocation.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Trainer report stored with the run, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Mark the run as running and stamp `started_at`.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
    }

    /// Move the run to a terminal `status` and stamp `ended_at`.
    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Record that `iteration` finished successfully.
    pub fn complete_iteration(&mut self, iteration: u64) {
        self.iteration = Some(iteration);
    }

    /// Apply `rate` from `iteration` on.
    ///
    /// Returns `false` (and changes nothing) when `rate` equals the rate
    /// already applied.
    #[allow(clippy::float_cmp)]
    pub fn set_learning_rate(&mut self, iteration: u64, rate: f64) -> bool {
        if self.learning_rate == Some(rate) {
            return false;
        }
        self.learning_rate = Some(rate);
        self.learning_rates.insert(iteration, rate);
        true
    }

    /// Track `loss` against the best cost. Ties count as improvement.
    ///
    /// Returns whether `loss` is the new best.
    pub fn observe_loss(&mut self, loss: f64) -> bool {
        let is_best = loss <= self.best_cost();
        if is_best {
            self.best_cost = Some(loss);
        }
        is_best
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    record: RunRecord,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            record: RunRecord::new(run_id),
        }
    }

    /// Attach the trainer report.
    #[must_use]
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.record.config = Some(config);
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        self.record
    }
}
