//! Error types for Trueno-Trainer
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single training step could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrainingFailure {
    /// The reduced loss was NaN; optimizer state is assumed poisoned
    #[error("training cost is NaN")]
    NanLoss,

    /// The model returned an empty loss tensor
    #[error("model returned an empty loss tensor")]
    EmptyLoss,

    /// The model's step operation failed
    #[error("model step failed: {0}")]
    Step(String),
}

/// Trueno-Trainer error types
#[derive(Error, Debug)]
pub enum Error {
    /// Batch channel closed (control signal, not a failure)
    #[error("Batch channel closed")]
    ChannelClosed,

    /// Manual interrupt observed at a blocking point
    #[error("Training interrupted by operator")]
    Interrupted,

    /// Batch source has no more batches
    #[error("Batch source exhausted")]
    SourceExhausted,

    /// Batch source failed to produce a batch
    #[error("Batch source error: {0}")]
    Source(String),

    /// Fatal failure of one loop invocation
    #[error("Training failed at iteration {iteration}: {cause}")]
    Training {
        /// Iteration being executed when the failure happened
        iteration: u64,
        /// What went wrong
        cause: TrainingFailure,
    },

    /// Schedule rejected at registration time
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Run store operation failed
    #[error("Run store error: {0}")]
    Store(String),

    /// A run with this identifier already exists and the conflict policy refused to touch it
    #[error("Run already exists: {0}\nUse ConflictPolicy::Delete or ConflictPolicy::Resume to reuse the identifier")]
    RunExists(String),

    /// Trainable model operation failed outside the training step (validation, checkpoint)
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration validation error
    #[error("Config validation error: {0}")]
    Config(String),

    /// Operator command could not be parsed
    #[error("Unrecognised operator command: {0}")]
    InvalidCommand(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Prefetch worker thread panicked
    #[error("Prefetch worker panicked\nThe batch source may hold partially consumed state. Please report this issue.")]
    WorkerPanicked,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Iteration carried by a training failure, if any.
    #[must_use]
    pub const fn iteration(&self) -> Option<u64> {
        match self {
            Self::Training { iteration, .. } => Some(*iteration),
            _ => None,
        }
    }

    /// Whether this error is a divergence (NaN loss).
    #[must_use]
    pub const fn is_divergence(&self) -> bool {
        matches!(
            self,
            Self::Training {
                cause: TrainingFailure::NanLoss,
                ..
            }
        )
    }
}
