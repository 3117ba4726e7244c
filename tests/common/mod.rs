//! Shared fixtures: scripted model, counting batch source, flaky store.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trueno_trainer::batch::{Batch, Tensor};
use trueno_trainer::experiment::{
    MemoryRunStore, MetricRecord, RunRecord, RunStore, ValidationRecord,
};
use trueno_trainer::model::{LossTensor, TrainableModel};
use trueno_trainer::prefetch::{BatchSource, StopToken};
use trueno_trainer::schedule::builtin::{FoldBatch, ValidationSource};
use trueno_trainer::{Error, Result};

/// What the model saw, readable after the model moved into a trainer.
#[derive(Debug, Clone, Default)]
pub struct ModelLog {
    pub learning_rates: Arc<Mutex<Vec<f64>>>,
    pub checkpoints: Arc<Mutex<Vec<u64>>>,
}

impl ModelLog {
    pub fn learning_rates(&self) -> Vec<f64> {
        self.learning_rates.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> Vec<u64> {
        self.checkpoints.lock().unwrap().clone()
    }

    pub fn steps(&self) -> usize {
        self.learning_rates.lock().unwrap().len()
    }
}

/// Model whose loss decays with every step; can be scripted to return NaN
/// or fail at a given step (0-based count of `step_train` calls).
pub struct MockModel {
    seen: ModelLog,
    steps: u64,
    nan_at_step: Option<u64>,
    fail_at_step: Option<u64>,
}

impl MockModel {
    pub fn new() -> (Self, ModelLog) {
        let seen = ModelLog::default();
        let model = Self {
            seen: seen.clone(),
            steps: 0,
            nan_at_step: None,
            fail_at_step: None,
        };
        (model, seen)
    }

    pub fn nan_at(mut self, step: u64) -> Self {
        self.nan_at_step = Some(step);
        self
    }

    pub fn fail_at(mut self, step: u64) -> Self {
        self.fail_at_step = Some(step);
        self
    }
}

impl TrainableModel for MockModel {
    fn step_train(&mut self, _: &Tensor, _: &Tensor, learning_rate: f64) -> Result<LossTensor> {
        let step = self.steps;
        self.steps += 1;
        self.seen.learning_rates.lock().unwrap().push(learning_rate);

        if self.fail_at_step == Some(step) {
            return Err(Error::Model(format!("scripted failure at step {step}")));
        }
        if self.nan_at_step == Some(step) {
            return Ok(vec![0.5, f32::NAN]);
        }
        #[allow(clippy::cast_precision_loss)]
        let loss = 1.0 / (step as f32 + 1.0);
        Ok(vec![loss, loss])
    }

    fn step_validate(&mut self, _: &Tensor, _: &Tensor) -> Result<LossTensor> {
        Ok(vec![0.25, 0.75])
    }

    fn save_checkpoint(&mut self, iteration: u64) -> Result<()> {
        self.seen.checkpoints.lock().unwrap().push(iteration);
        Ok(())
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({"name": "mock"})
    }
}

/// Infinite (or limited) source; batch `n` has source id `batch-n` and input `[n]`.
pub struct CountingSource {
    produced: u64,
    limit: Option<u64>,
    fail_at: Option<u64>,
}

impl CountingSource {
    pub fn unbounded() -> Self {
        Self {
            produced: 0,
            limit: None,
            fail_at: None,
        }
    }

    pub fn limited(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::unbounded()
        }
    }

    pub fn failing_at(batch: u64) -> Self {
        Self {
            fail_at: Some(batch),
            ..Self::unbounded()
        }
    }
}

impl BatchSource for CountingSource {
    fn next_batch(&mut self, _: &StopToken) -> Result<Batch> {
        let n = self.produced;
        if self.limit.is_some_and(|limit| n >= limit) {
            return Err(Error::SourceExhausted);
        }
        if self.fail_at == Some(n) {
            return Err(Error::Source(format!("corrupt batch {n}")));
        }
        self.produced += 1;
        #[allow(clippy::cast_precision_loss)]
        let value = n as f32;
        Ok(Batch::new(
            Tensor::from_vec(vec![value]),
            Tensor::from_vec(vec![0.0]),
            format!("batch-{n}"),
        ))
    }

    fn describe(&self) -> serde_json::Value {
        serde_json::json!({"name": "counting", "limit": self.limit})
    }
}

/// Yields `ready` batches, then waits on the stop token for up to 30 s.
pub struct StalledSource {
    inner: CountingSource,
    ready: u64,
}

impl StalledSource {
    pub fn after(ready: u64) -> Self {
        Self {
            inner: CountingSource::unbounded(),
            ready,
        }
    }
}

impl BatchSource for StalledSource {
    fn next_batch(&mut self, stop: &StopToken) -> Result<Batch> {
        if self.inner.produced < self.ready {
            return self.inner.next_batch(stop);
        }
        if stop.sleep(Duration::from_secs(30)) {
            return Err(Error::Interrupted);
        }
        Err(Error::SourceExhausted)
    }
}

/// Two validation folds per pass.
pub struct TwoFoldValidation;

impl ValidationSource for TwoFoldValidation {
    fn validation_batches(&mut self) -> Result<Vec<FoldBatch>> {
        let batch = |source: &str| {
            Batch::new(
                Tensor::from_vec(vec![1.0]),
                Tensor::from_vec(vec![0.0]),
                source,
            )
        };
        Ok(vec![
            FoldBatch::new("train", batch("kettle")),
            FoldBatch::new("unseen_appliances", batch("fridge")),
        ])
    }
}

/// Memory store whose metric inserts fail every `period`-th call.
pub struct FlakyStore {
    inner: MemoryRunStore,
    period: u64,
    calls: AtomicU64,
}

impl FlakyStore {
    pub fn new(period: u64) -> Self {
        Self {
            inner: MemoryRunStore::new(),
            period,
            calls: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryRunStore {
        &self.inner
    }
}

impl RunStore for FlakyStore {
    fn insert_run(&self, run: &RunRecord) -> Result<()> {
        self.inner.insert_run(run)
    }

    fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.inner.find_run(run_id)
    }

    fn upsert_run_field(&self, run_id: &str, path: &str, value: serde_json::Value) -> Result<()> {
        self.inner.upsert_run_field(run_id, path, value)
    }

    fn delete_run(&self, run_id: &str) -> Result<()> {
        self.inner.delete_run(run_id)
    }

    fn insert_metric(&self, record: &MetricRecord) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % self.period == 0 {
            return Err(Error::Store("write timeout".into()));
        }
        self.inner.insert_metric(record)
    }

    fn insert_validation(&self, record: &ValidationRecord) -> Result<()> {
        self.inner.insert_validation(record)
    }
}

/// Iteration numbers of a run's metric rows, in insertion order.
pub fn metric_iterations(store: &MemoryRunStore, run_id: &str) -> Vec<u64> {
    store
        .metrics_for_run(run_id)
        .iter()
        .map(MetricRecord::iteration)
        .collect()
}
