//! Loop states and the outcome of one loop invocation

use serde::{Deserialize, Serialize};

use crate::experiment::RunStatus;

/// State of the iteration loop.
///
/// `Idle → Running → {Stopped, Diverged, Interrupted, Failed}`; every
/// terminal state may move back to `Running` through another `fit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Constructed, never run
    #[default]
    Idle,
    /// Inside `fit`
    Running,
    /// Reached the limit, or the source ran dry
    Stopped,
    /// Loss became NaN
    Diverged,
    /// Manual interrupt observed
    Interrupted,
    /// Model step, source or worker failure
    Failed,
}

impl LoopState {
    /// Whether the loop is not running and can be resumed or inspected.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }

    /// Whether the recovery controls should be offered.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Diverged | Self::Interrupted)
    }

    /// Run status persisted for this state.
    #[must_use]
    pub const fn run_status(self) -> RunStatus {
        match self {
            Self::Idle => RunStatus::Pending,
            Self::Running => RunStatus::Running,
            Self::Stopped => RunStatus::Stopped,
            Self::Diverged => RunStatus::Diverged,
            Self::Interrupted => RunStatus::Interrupted,
            Self::Failed => RunStatus::Failed,
        }
    }

    /// Get state name as string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Diverged => "diverged",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one loop invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Terminal state
    pub state: LoopState,
    /// Iteration being executed (or about to be) when the loop ended
    pub iteration: u64,
    /// Last completed iteration, `None` if none has ever completed
    pub completed: Option<u64>,
}

impl LoopOutcome {
    /// Number of the next iteration a resumed loop would execute.
    #[must_use]
    pub fn next_iteration(&self) -> u64 {
        self.completed.map_or(0, |completed| completed + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!LoopState::Idle.is_terminal());
        assert!(!LoopState::Running.is_terminal());
        for state in [
            LoopState::Stopped,
            LoopState::Diverged,
            LoopState::Interrupted,
            LoopState::Failed,
        ] {
            assert!(state.is_terminal());
        }
        assert!(LoopState::Interrupted.is_recoverable());
        assert!(!LoopState::Failed.is_recoverable());
    }

    #[test]
    fn test_run_status_mapping() {
        assert_eq!(LoopState::Diverged.run_status(), RunStatus::Diverged);
        assert_eq!(LoopState::Idle.run_status(), RunStatus::Pending);
        assert_eq!(LoopState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_outcome_next_iteration() {
        let fresh = LoopOutcome {
            state: LoopState::Interrupted,
            iteration: 0,
            completed: None,
        };
        assert_eq!(fresh.next_iteration(), 0);

        let resumed = LoopOutcome {
            state: LoopState::Interrupted,
            iteration: 51,
            completed: Some(50),
        };
        assert_eq!(resumed.next_iteration(), 51);
    }
}
