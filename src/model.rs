//! Trainable model capability and loss reduction
//!
//! The numerical model is opaque to the orchestrator: it only needs a
//! single optimisation step, a side-effect free validation pass and a way
//! to persist its parameters.

use serde::{Deserialize, Serialize};
use trueno::Vector;

use crate::batch::Tensor;
use crate::error::TrainingFailure;
use crate::Result;

/// Raw per-element loss returned by a model step.
pub type LossTensor = Vec<f32>;

/// Capability the iteration loop drives.
///
/// Implementations are only ever touched from the loop thread.
pub trait TrainableModel {
    /// Run one optimisation step on `input`/`target` at `learning_rate`,
    /// mutating the model parameters.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the current iteration; the loop does not retry.
    fn step_train(&mut self, input: &Tensor, target: &Tensor, learning_rate: f64)
        -> Result<LossTensor>;

    /// Compute the loss on `input`/`target` without updating parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    fn step_validate(&mut self, input: &Tensor, target: &Tensor) -> Result<LossTensor>;

    /// Persist the model parameters as of `iteration`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written.
    fn save_checkpoint(&mut self, iteration: u64) -> Result<()>;

    /// JSON description stored in the run document.
    fn describe(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// How a loss tensor is reduced to the scalar the loop tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossAggregation {
    /// Arithmetic mean of all elements (default)
    #[default]
    Mean,
    /// Sum of all elements
    Sum,
}

impl LossAggregation {
    /// Get aggregation name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
        }
    }

    /// Reduce `loss` to a scalar using SIMD summation.
    ///
    /// NaN elements propagate into the result; detecting them is the
    /// caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingFailure::EmptyLoss`] for an empty tensor and
    /// [`TrainingFailure::Step`] if the SIMD backend rejects the input.
    #[allow(clippy::cast_precision_loss)]
    pub fn reduce(&self, loss: &[f32]) -> std::result::Result<f64, TrainingFailure> {
        if loss.is_empty() {
            return Err(TrainingFailure::EmptyLoss);
        }
        let sum = Vector::from_slice(loss)
            .sum()
            .map_err(|e| TrainingFailure::Step(format!("loss reduction failed: {e:?}")))?;
        let sum = f64::from(sum);
        Ok(match self {
            Self::Mean => sum / loss.len() as f64,
            Self::Sum => sum,
        })
    }
}
