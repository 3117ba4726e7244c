//! Run Store - persistence capability for runs, metrics and validation scores
//!
//! The orchestrator receives a store explicitly at construction; there is no
//! process-wide client. `MemoryRunStore` is the default backend - data is
//! lost on process restart.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use serde_json::{Map, Value};

use super::{MetricRecord, RunRecord, ValidationRecord};
use crate::{Error, Result};

/// Document store the orchestrator persists into.
///
/// All calls are independent; no cross-call transaction is required.
/// Identifiers are strings.
pub trait RunStore: Send + Sync {
    /// Insert a new run document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if a run with the same ID already exists.
    fn insert_run(&self, run: &RunRecord) -> Result<()>;

    /// Look up a run by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the document cannot be read back.
    fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Set one field of a run document, creating the document if missing.
    ///
    /// `path` is dot separated (`"learning_rates.100"`); intermediate objects
    /// are created as needed. Setting the same path twice is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] for an empty path or path segment.
    fn upsert_run_field(&self, run_id: &str, path: &str, value: Value) -> Result<()>;

    /// Delete a run and every metric/validation row that belongs to it.
    ///
    /// No-op if the run doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    fn delete_run(&self, run_id: &str) -> Result<()>;

    /// Append a metric row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    fn insert_metric(&self, record: &MetricRecord) -> Result<()>;

    /// Append a validation row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the backend fails.
    fn insert_validation(&self, record: &ValidationRecord) -> Result<()>;
}

/// In-memory run store using lock-free concurrent hashmaps.
///
/// Run documents are kept as JSON so partial updates behave like a document
/// database. Rows are kept per run in insertion order.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use trueno_trainer::experiment::{MemoryRunStore, MetricRecord, RunRecord, RunStore};
///
/// let store = MemoryRunStore::new();
/// store.insert_run(&RunRecord::new("run-001"))?;
/// store.upsert_run_field("run-001", "learning_rates.0", serde_json::json!(0.01))?;
/// store.insert_metric(&MetricRecord::new("run-001", 0, 0.5, "a", Duration::ZERO))?;
///
/// let run = store.find_run("run-001")?.unwrap();
/// assert_eq!(run.learning_rates().get(&0), Some(&0.01));
/// assert_eq!(store.metrics_for_run("run-001").len(), 1);
/// # Ok::<(), trueno_trainer::Error>(())
/// ```
#[derive(Debug)]
pub struct MemoryRunStore {
    runs: DashMap<String, Value, FxBuildHasher>,
    metrics: DashMap<String, Vec<MetricRecord>, FxBuildHasher>,
    validations: DashMap<String, Vec<ValidationRecord>, FxBuildHasher>,
}

impl MemoryRunStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: DashMap::with_hasher(FxBuildHasher),
            metrics: DashMap::with_hasher(FxBuildHasher),
            validations: DashMap::with_hasher(FxBuildHasher),
        }
    }

    /// Check if the store is empty (no runs or rows).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty() && self.metric_count() == 0 && self.validations.is_empty()
    }

    /// Get the number of run documents.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Get the total number of metric rows across all runs.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.iter().map(|rows| rows.value().len()).sum()
    }

    /// Raw JSON document of a run.
    #[must_use]
    pub fn run_document(&self, run_id: &str) -> Option<Value> {
        self.runs.get(run_id).map(|doc| doc.value().clone())
    }

    /// Metric rows of a run, in insertion order.
    #[must_use]
    pub fn metrics_for_run(&self, run_id: &str) -> Vec<MetricRecord> {
        self.metrics
            .get(run_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }

    /// Validation rows of a run, in insertion order.
    #[must_use]
    pub fn validations_for_run(&self, run_id: &str) -> Vec<ValidationRecord> {
        self.validations
            .get(run_id)
            .map(|rows| rows.value().clone())
            .unwrap_or_default()
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore for MemoryRunStore {
    fn insert_run(&self, run: &RunRecord) -> Result<()> {
        let doc = serde_json::to_value(run)?;
        match self.runs.entry(run.run_id().to_string()) {
            Entry::Occupied(_) => Err(Error::Store(format!(
                "run '{}' already exists",
                run.run_id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(doc);
                Ok(())
            }
        }
    }

    fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let Some(doc) = self.run_document(run_id) else {
            return Ok(None);
        };
        serde_json::from_value(doc)
            .map(Some)
            .map_err(|e| Error::Store(format!("corrupt run document '{run_id}': {e}")))
    }

    fn upsert_run_field(&self, run_id: &str, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(Error::Store(format!("invalid field path '{path}'")));
        }
        let mut doc = self.runs.entry(run_id.to_string()).or_insert_with(|| {
            let mut seed = Map::new();
            seed.insert("run_id".to_string(), Value::String(run_id.to_string()));
            Value::Object(seed)
        });
        set_path(doc.value_mut(), &segments, value);
        Ok(())
    }

    fn delete_run(&self, run_id: &str) -> Result<()> {
        self.runs.remove(run_id);
        self.metrics.remove(run_id);
        self.validations.remove(run_id);
        Ok(())
    }

    fn insert_metric(&self, record: &MetricRecord) -> Result<()> {
        self.metrics
            .entry(record.run_id().to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn insert_validation(&self, record: &ValidationRecord) -> Result<()> {
        self.validations
            .entry(record.run_id().to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }
}

fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn set_path(doc: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cursor = doc;
    for segment in parents {
        cursor = object_mut(cursor)
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(cursor).insert((*last).to_string(), value);
}
