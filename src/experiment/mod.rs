//! Experiment Tracking Schema
//!
//! Records persisted by the orchestrator and the store capability they are
//! persisted through.
//!
//! ## Schema Overview
//!
//! ```text
//! RunRecord (1) ──┬──< MetricRecord (N)     [one per iteration, append-only]
//!                 └──< ValidationRecord (N) [one per fold per validation pass]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use trueno_trainer::experiment::{MetricRecord, RunRecord, RunStatus};
//!
//! let mut run = RunRecord::new(RunRecord::id_from_parts(&["e1", "kettle"]));
//! run.start();
//!
//! let metric = MetricRecord::new(run.run_id(), 0, 0.5, "kettle", Duration::from_millis(12));
//! run.complete_iteration(metric.iteration());
//!
//! run.complete(RunStatus::Stopped);
//! assert_eq!(run.next_iteration(), 1);
//! ```

mod metric_record;
mod run_record;
mod store;
mod validation_record;

pub use metric_record::{MetricRecord, MetricRecordBuilder};
pub use run_record::{fields, RunRecord, RunRecordBuilder, RunStatus};
pub use store::{MemoryRunStore, RunStore};
pub use validation_record::ValidationRecord;
