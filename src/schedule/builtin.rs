//! Built-in callbacks: periodic validation and checkpointing

use crate::batch::Batch;
use crate::experiment::ValidationRecord;
use crate::model::LossAggregation;
use crate::schedule::{Callback, LoopHandle};
use crate::{Error, Result};

/// Score name under which validation loss is recorded.
pub const LOSS_SCORE: &str = "loss";

/// A validation batch tagged with the fold it was drawn from.
#[derive(Debug, Clone)]
pub struct FoldBatch {
    /// Fold name (for example `"train"` or `"unseen_appliances"`)
    pub fold: String,
    /// The batch to score
    pub batch: Batch,
}

impl FoldBatch {
    /// Tag `batch` with `fold`.
    #[must_use]
    pub fn new(fold: impl Into<String>, batch: Batch) -> Self {
        Self {
            fold: fold.into(),
            batch,
        }
    }
}

/// Supplies one batch per fold for a validation pass.
///
/// Runs on the loop thread, so it never competes with the prefetch worker
/// for the training source.
pub trait ValidationSource {
    /// Batches for the next validation pass.
    ///
    /// # Errors
    ///
    /// Any error skips this pass; training continues.
    fn validation_batches(&mut self) -> Result<Vec<FoldBatch>>;
}

/// Scores the model on every fold and records one [`ValidationRecord`] each.
pub struct ValidationCallback {
    source: Box<dyn ValidationSource>,
    aggregation: LossAggregation,
}

impl ValidationCallback {
    /// Create a validation callback.
    #[must_use]
    pub fn new(source: Box<dyn ValidationSource>, aggregation: LossAggregation) -> Self {
        Self {
            source,
            aggregation,
        }
    }
}

impl Callback for ValidationCallback {
    fn name(&self) -> &str {
        "validation"
    }

    fn invoke(&mut self, handle: &mut LoopHandle<'_>) -> Result<()> {
        let iteration = handle.iteration();
        let run_id = handle.run().run_id().to_string();

        for FoldBatch { fold, batch } in self.source.validation_batches()? {
            let losses = handle
                .model()
                .step_validate(batch.input(), batch.target())?;
            let loss = self
                .aggregation
                .reduce(&losses)
                .map_err(|cause| Error::Model(format!("validation on fold '{fold}': {cause}")))?;

            tracing::info!(
                iteration,
                fold = %fold,
                source_id = batch.source_id(),
                loss,
                "validation"
            );
            let record = ValidationRecord::new(&run_id, iteration, batch.source_id(), fold)
                .with_score(LOSS_SCORE, loss);
            handle.recorder().record_validation(&record);
        }
        Ok(())
    }
}

/// Asks the model to persist its parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckpointCallback;

impl Callback for CheckpointCallback {
    fn name(&self) -> &str {
        "checkpoint"
    }

    fn invoke(&mut self, handle: &mut LoopHandle<'_>) -> Result<()> {
        let iteration = handle.iteration();
        handle.model().save_checkpoint(iteration)?;
        tracing::info!(iteration, "checkpoint saved");
        Ok(())
    }
}
