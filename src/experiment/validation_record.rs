//! Validation Record - per-fold scores computed between training iterations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validation Record holds the scores for one source/fold at one iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRecord {
    run_id: String,
    iteration: u64,
    source_id: String,
    fold: String,
    scores: BTreeMap<String, f64>,
    timestamp: DateTime<Utc>,
}

impl ValidationRecord {
    /// Create an empty record; add scores with [`with_score`](Self::with_score).
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        iteration: u64,
        source_id: impl Into<String>,
        fold: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            iteration,
            source_id: source_id.into(),
            fold: fold.into(),
            scores: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a named score.
    #[must_use]
    pub fn with_score(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scores.insert(name.into(), value);
        self
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the iteration the validation ran after.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Get the batch source ID.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Get the fold name.
    #[must_use]
    pub fn fold(&self) -> &str {
        &self.fold
    }

    /// Get a score by name.
    #[must_use]
    pub fn score(&self, name: &str) -> Option<f64> {
        self.scores.get(name).copied()
    }

    /// All scores.
    #[must_use]
    pub const fn scores(&self) -> &BTreeMap<String, f64> {
        &self.scores
    }

    /// Get the timestamp when the record was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
