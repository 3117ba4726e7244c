//! Iteration Loop - the training orchestrator
//!
//! One call to [`Trainer::fit`] starts the prefetch worker, runs iterations
//! until a terminal state, and always stops the worker again. Per iteration:
//!
//! 1. resolve the learning rate (persisted only when it changes)
//! 2. take the next batch, honouring the interrupt signal while waiting
//! 3. run one model step, timed
//! 4. reduce the loss; NaN ends the loop as `Diverged`
//! 5. record the metric row, best cost and completed iteration
//! 6. run the callbacks due at this iteration
//! 7. stop at the limit, otherwise advance
//!
//! Store failures and callback failures are logged and counted; they never
//! stop training.

mod state;

pub use state::{LoopOutcome, LoopState};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use crate::batch::Batch;
use crate::channel::InterruptSignal;
use crate::config::{ConflictPolicy, TrainerConfig};
use crate::error::TrainingFailure;
use crate::experiment::{MetricRecord, RunRecord, RunStatus, RunStore};
use crate::model::TrainableModel;
use crate::prefetch::{BatchSource, PrefetchWorker};
use crate::recorder::RunRecorder;
use crate::schedule::builtin::{CheckpointCallback, ValidationCallback, ValidationSource};
use crate::schedule::{Callback, CallbackId, LearningRateSchedule, LoopHandle, ScheduleTable};
use crate::{Error, Result};

/// Drives a [`TrainableModel`] over batches from a [`BatchSource`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trueno_trainer::experiment::MemoryRunStore;
/// use trueno_trainer::model::TrainableModel;
/// use trueno_trainer::prefetch::BatchSource;
/// use trueno_trainer::trainer::{LoopState, Trainer};
///
/// fn train(model: impl TrainableModel + 'static, source: impl BatchSource + 'static)
///     -> trueno_trainer::Result<()> {
///     let store = Arc::new(MemoryRunStore::new());
///     let mut trainer = Trainer::builder("e1_kettle", model, source, store)
///         .every(100, |handle: &mut trueno_trainer::schedule::LoopHandle<'_>| {
///             println!("iteration {}", handle.iteration());
///             Ok(())
///         })
///         .build()?;
///
///     let outcome = trainer.fit(Some(1_000))?;
///     assert_eq!(outcome.state, LoopState::Stopped);
///     Ok(())
/// }
/// ```
pub struct Trainer {
    config: TrainerConfig,
    run: RunRecord,
    model: Box<dyn TrainableModel>,
    worker: PrefetchWorker,
    schedule: ScheduleTable,
    learning_rates: LearningRateSchedule,
    recorder: RunRecorder,
    interrupt: InterruptSignal,
    state: LoopState,
    current_iteration: u64,
    last_outcome: Option<LoopOutcome>,
    callback_failures: u64,
}

impl Trainer {
    /// Start building a trainer for `run_id`.
    pub fn builder(
        run_id: impl Into<String>,
        model: impl TrainableModel + 'static,
        source: impl BatchSource + 'static,
        store: Arc<dyn RunStore>,
    ) -> TrainerBuilder {
        TrainerBuilder::new(run_id, Box::new(model), Box::new(source), store)
    }

    /// Run the loop until `limit` (inclusive) or another terminal state.
    ///
    /// With `None` the loop runs until interrupted or the source runs dry.
    /// Training continues at the iteration after the last completed one.
    ///
    /// Interrupt and source exhaustion are normal outcomes. An interrupt
    /// raised while no loop is running stays pending, so the next call
    /// returns `Interrupted` before running a step. Ending as `Interrupted`
    /// consumes the interrupt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] for a NaN loss (state `Diverged`) or a
    /// failed model step, the source's error for a source failure, and
    /// [`Error::WorkerPanicked`] if the prefetch thread panicked (all
    /// `Failed` unless stated otherwise). The outcome stays available via
    /// [`last_outcome`](Self::last_outcome).
    pub fn fit(&mut self, limit: Option<u64>) -> Result<LoopOutcome> {
        self.state = LoopState::Running;
        self.current_iteration = self.run.next_iteration();
        self.run.start();
        self.recorder.record_status(self.run.status());
        tracing::info!(
            run_id = self.run.run_id(),
            next_iteration = self.current_iteration,
            limit = ?limit,
            "starting training"
        );

        let result = self
            .worker
            .start()
            .and_then(|()| self.run_loop(limit));
        let worker_result = self.worker.stop();

        let (state, result) = match (result, worker_result) {
            (Ok(state), Ok(())) => (state, Ok(())),
            (Ok(_), Err(e)) => (LoopState::Failed, Err(e)),
            (Err(e), worker_result) => {
                if let Err(worker_error) = worker_result {
                    tracing::warn!(error = %worker_error, "prefetch worker failed during shutdown");
                }
                (state_for(&e), Err(e))
            }
        };

        let outcome = self.finish(state);
        result.map(|()| outcome)
    }

    fn run_loop(&mut self, limit: Option<u64>) -> Result<LoopState> {
        let channel = self.worker.channel();
        let mut iteration = self.current_iteration;
        if limit.is_some_and(|limit| iteration > limit) {
            tracing::info!(iteration, limit = ?limit, "iteration limit already reached");
            return Ok(LoopState::Stopped);
        }

        loop {
            self.current_iteration = iteration;
            if self.interrupt.is_raised() {
                return Ok(LoopState::Interrupted);
            }

            let learning_rate = self.apply_learning_rate(iteration);

            let batch = match channel.take_until(&self.interrupt) {
                Ok(batch) => batch,
                Err(Error::Interrupted) => return Ok(LoopState::Interrupted),
                Err(Error::ChannelClosed) => {
                    return match self.worker.take_failure() {
                        None | Some(Error::SourceExhausted) => Ok(LoopState::Stopped),
                        Some(e) => Err(e),
                    };
                }
                Err(e) => return Err(e),
            };

            self.train_step(iteration, learning_rate, &batch)?;
            drop(batch);
            self.run_callbacks(iteration);

            if limit == Some(iteration) {
                return Ok(LoopState::Stopped);
            }
            iteration += 1;
        }
    }

    fn apply_learning_rate(&mut self, iteration: u64) -> f64 {
        let rate = self.learning_rates.rate_at(iteration);
        if self.run.set_learning_rate(iteration, rate) {
            tracing::info!(iteration, learning_rate = rate, "learning rate changed");
            self.recorder.record_learning_rate_change(iteration, rate);
        } else if self.learning_rates.has_entry_at(iteration) {
            tracing::info!(
                iteration,
                learning_rate = rate,
                "scheduled learning rate equals current rate"
            );
        }
        rate
    }

    fn train_step(&mut self, iteration: u64, learning_rate: f64, batch: &Batch) -> Result<()> {
        let started = Instant::now();
        let losses = self
            .model
            .step_train(batch.input(), batch.target(), learning_rate)
            .map_err(|e| Error::Training {
                iteration,
                cause: TrainingFailure::Step(e.to_string()),
            })?;
        let duration = started.elapsed();

        let loss = self
            .config
            .loss_aggregation
            .reduce(&losses)
            .map_err(|cause| Error::Training { iteration, cause })?;
        if loss.is_nan() {
            return Err(Error::Training {
                iteration,
                cause: TrainingFailure::NanLoss,
            });
        }

        let record =
            MetricRecord::new(self.run.run_id(), iteration, loss, batch.source_id(), duration);
        self.recorder.record_metric(&record);

        let is_best = self.run.observe_loss(loss);
        if is_best {
            self.recorder.record_best_cost(loss);
        }
        self.run.complete_iteration(iteration);
        self.recorder.record_progress(iteration);

        tracing::debug!(
            iteration,
            loss,
            learning_rate,
            source_id = batch.source_id(),
            duration_secs = record.duration_secs(),
            is_best,
            "iteration complete"
        );
        Ok(())
    }

    fn run_callbacks(&mut self, iteration: u64) {
        for id in self.schedule.due(iteration) {
            let Some(callback) = self.schedule.callback_mut(id) else {
                continue;
            };
            let name = callback.name().to_string();
            let mut handle = LoopHandle::new(
                iteration,
                &self.run,
                self.model.as_mut(),
                &mut self.recorder,
                &self.interrupt,
            );
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(&mut handle)));

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            };
            if let Some(failure) = failure {
                self.callback_failures += 1;
                tracing::warn!(
                    iteration,
                    callback = %name,
                    error = %failure,
                    "callback failed; continuing"
                );
            }
            self.schedule.mark_fired(id);
        }
    }

    fn finish(&mut self, state: LoopState) -> LoopOutcome {
        self.state = state;
        if state == LoopState::Interrupted {
            self.interrupt.clear();
        }
        let outcome = LoopOutcome {
            state,
            iteration: self.current_iteration,
            completed: self.run.iteration(),
        };
        self.run.complete(state.run_status());
        self.recorder.record_status(self.run.status());

        match state {
            LoopState::Diverged => tracing::error!(
                run_id = self.run.run_id(),
                iteration = outcome.iteration,
                "training cost is NaN; training diverged"
            ),
            LoopState::Failed => tracing::error!(
                run_id = self.run.run_id(),
                iteration = outcome.iteration,
                "training failed"
            ),
            _ => tracing::info!(
                run_id = self.run.run_id(),
                state = %state,
                iteration = outcome.iteration,
                completed = ?outcome.completed,
                "stopped training"
            ),
        }
        self.last_outcome = Some(outcome);
        outcome
    }

    /// Register a repeating callback after construction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] for a period ≤ 0.
    pub fn every(&mut self, period: i64, callback: impl Callback + 'static) -> Result<CallbackId> {
        self.schedule.every(period, callback)
    }

    /// Register a one-shot callback after construction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] for a negative iteration.
    pub fn at(&mut self, iteration: i64, callback: impl Callback + 'static) -> Result<CallbackId> {
        self.schedule.at(iteration, callback)
    }

    /// Ask the model to checkpoint at the last completed iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no iteration has completed yet,
    /// otherwise the model's checkpoint error.
    pub fn save_checkpoint(&mut self) -> Result<()> {
        let iteration = self.run.iteration().ok_or_else(|| {
            Error::InvalidState("no completed iteration to checkpoint".into())
        })?;
        self.model.save_checkpoint(iteration)?;
        tracing::info!(run_id = self.run.run_id(), iteration, "checkpoint saved");
        Ok(())
    }

    /// Mark the run as abandoned by the operator.
    pub fn abort(&mut self) {
        self.run.complete(RunStatus::Aborted);
        self.recorder.record_status(self.run.status());
        tracing::info!(
            run_id = self.run.run_id(),
            completed = ?self.run.iteration(),
            "training aborted by operator"
        );
    }

    /// Current loop state.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// In-memory run state.
    #[must_use]
    pub const fn run(&self) -> &RunRecord {
        &self.run
    }

    /// Outcome of the most recent `fit`.
    #[must_use]
    pub const fn last_outcome(&self) -> Option<LoopOutcome> {
        self.last_outcome
    }

    /// Handle that interrupts the loop when raised from any thread.
    ///
    /// Raised between calls to [`fit`](Self::fit), it interrupts the next one.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptSignal {
        self.interrupt.clone()
    }

    /// Learning rate currently applied.
    #[must_use]
    pub const fn learning_rate(&self) -> Option<f64> {
        self.run.learning_rate()
    }

    /// Number of failed store calls so far.
    #[must_use]
    pub const fn store_errors(&self) -> u64 {
        self.recorder.store_errors()
    }

    /// Number of callbacks that returned an error or panicked.
    #[must_use]
    pub const fn callback_failures(&self) -> u64 {
        self.callback_failures
    }

    /// Whether the prefetch worker thread is alive.
    #[must_use]
    pub const fn prefetch_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Registered callbacks.
    #[must_use]
    pub const fn schedule(&self) -> &ScheduleTable {
        &self.schedule
    }
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("run", &self.run)
            .field("state", &self.state)
            .field("schedule", &self.schedule)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

fn state_for(error: &Error) -> LoopState {
    if error.is_divergence() {
        LoopState::Diverged
    } else {
        LoopState::Failed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Builder for [`Trainer`].
pub struct TrainerBuilder {
    run_id: String,
    model: Box<dyn TrainableModel>,
    source: Box<dyn BatchSource>,
    store: Arc<dyn RunStore>,
    config: TrainerConfig,
    callbacks: Vec<(i64, Box<dyn Callback>, bool)>,
    validation_source: Option<Box<dyn ValidationSource>>,
}

impl TrainerBuilder {
    /// Create a builder with the default configuration.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        model: Box<dyn TrainableModel>,
        source: Box<dyn BatchSource>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            model,
            source,
            store,
            config: TrainerConfig::default(),
            callbacks: Vec::new(),
            validation_source: None,
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: TrainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a repeating callback; the period is checked in `build`.
    #[must_use]
    pub fn every(mut self, period: i64, callback: impl Callback + 'static) -> Self {
        self.callbacks.push((period, Box::new(callback), true));
        self
    }

    /// Register a one-shot callback; the iteration is checked in `build`.
    #[must_use]
    pub fn at(mut self, iteration: i64, callback: impl Callback + 'static) -> Self {
        self.callbacks.push((iteration, Box::new(callback), false));
        self
    }

    /// Source for the built-in validation callback.
    #[must_use]
    pub fn validation_source(mut self, source: impl ValidationSource + 'static) -> Self {
        self.validation_source = Some(Box::new(source));
        self
    }

    /// Validate the configuration, resolve an existing run and create the trainer.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSchedule`] for a bad learning rate or callback trigger
    /// - [`Error::Config`] if `validation_period` is set without a validation source
    /// - [`Error::RunExists`] if the run exists and the policy is `Abort`
    /// - [`Error::Store`] if the run cannot be read, deleted or inserted
    pub fn build(self) -> Result<Trainer> {
        let Self {
            run_id,
            model,
            source,
            store,
            config,
            callbacks,
            validation_source,
        } = self;

        config.validate()?;
        let learning_rates = config.learning_rate_schedule()?;

        let mut schedule = ScheduleTable::new();
        match (config.validation_period, validation_source) {
            (Some(period), Some(source)) => {
                let callback = ValidationCallback::new(source, config.loss_aggregation);
                schedule.register(period, Box::new(callback), true)?;
            }
            (Some(_), None) => {
                return Err(Error::Config(
                    "validation_period is set but no validation source was given".into(),
                ));
            }
            (None, _) => {}
        }
        if let Some(period) = config.checkpoint_period {
            schedule.register(period, Box::new(CheckpointCallback), true)?;
        }
        for (trigger, callback, repeating) in callbacks {
            schedule.register(trigger, callback, repeating)?;
        }

        let worker = PrefetchWorker::new(source);
        let report = json!({
            "trainer": config,
            "model": model.describe(),
            "data": worker.describe(),
        });
        let run = resolve_run(store.as_ref(), &run_id, config.on_conflict, report)?;
        let recorder = RunRecorder::new(store, run_id);

        Ok(Trainer {
            config,
            current_iteration: run.next_iteration(),
            run,
            model,
            worker,
            schedule,
            learning_rates,
            recorder,
            interrupt: InterruptSignal::new(),
            state: LoopState::Idle,
            last_outcome: None,
            callback_failures: 0,
        })
    }
}

fn resolve_run(
    store: &dyn RunStore,
    run_id: &str,
    policy: ConflictPolicy,
    report: serde_json::Value,
) -> Result<RunRecord> {
    if let Some(existing) = store.find_run(run_id)? {
        match policy {
            ConflictPolicy::Abort => return Err(Error::RunExists(run_id.to_string())),
            ConflictPolicy::Resume => {
                tracing::info!(
                    run_id,
                    completed = ?existing.iteration(),
                    learning_rate = ?existing.learning_rate(),
                    "resuming existing run"
                );
                return Ok(existing);
            }
            ConflictPolicy::Delete => {
                tracing::warn!(run_id, "deleting existing run and all of its rows");
                store.delete_run(run_id)?;
            }
        }
    }

    let run = RunRecord::builder(run_id).config(report).build();
    store.insert_run(&run)?;
    tracing::info!(run_id, "created run");
    Ok(run)
}
