//! Recovery Controller - operator controls around the iteration loop
//!
//! When a loop invocation ends `Interrupted` or `Diverged` the controller is
//! paused with the prefetch worker already stopped. The operator can then
//! inspect the run, save a checkpoint, resume with a new limit or abort.
//! An interactive shell is a thin adapter that parses [`OperatorCommand`]s
//! and hands them to [`RecoveryController::apply`].

use std::str::FromStr;

use serde::Serialize;

use crate::trainer::{LoopOutcome, LoopState, Trainer};
use crate::{Error, Result};

/// How far a resumed loop may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// This many more iterations after the last completed one
    Additional(u64),
    /// Up to and including this absolute iteration
    UntilIteration(u64),
    /// Until interrupted or the source runs dry
    Unbounded,
}

impl Extension {
    /// Absolute limit for a loop that starts at `next_iteration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] for `Additional(0)`.
    pub fn limit_from(self, next_iteration: u64) -> Result<Option<u64>> {
        match self {
            Self::Additional(0) => Err(Error::InvalidState(
                "an extension must add at least one iteration".into(),
            )),
            Self::Additional(n) => Ok(Some(next_iteration.saturating_add(n - 1))),
            Self::UntilIteration(limit) => Ok(Some(limit)),
            Self::Unbounded => Ok(None),
        }
    }
}

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    /// Never trained
    Ready,
    /// Interrupted or diverged; controls available
    Paused,
    /// Reached its limit or the source ran dry; may be extended
    Finished,
    /// Fatal failure; only inspection and checkpointing remain
    Failed,
    /// Abandoned by the operator
    Aborted,
}

/// Operator command, one per menu letter.
///
/// ```rust
/// use trueno_trainer::recovery::OperatorCommand;
///
/// assert_eq!("c".parse::<OperatorCommand>()?, OperatorCommand::Continue);
/// assert_eq!("e 500".parse::<OperatorCommand>()?, OperatorCommand::ChangeLimit(Some(500)));
/// assert_eq!("e None".parse::<OperatorCommand>()?, OperatorCommand::ChangeLimit(None));
/// assert!("x".parse::<OperatorCommand>().is_err());
/// # Ok::<(), trueno_trainer::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `c`: resume training up to the current limit
    Continue,
    /// `s`: save a checkpoint
    SaveCheckpoint,
    /// `q`: abandon the run
    Quit,
    /// `e <n|None>`: change the absolute iteration limit
    ChangeLimit(Option<u64>),
    /// `i`: report the run state
    Inspect,
}

impl OperatorCommand {
    /// Parse a menu line that may hold several commands, e.g. `"se 500 c"`.
    ///
    /// Every letter of a word is one command, kept in typed order. `e` must
    /// end its word and takes the next word as its argument.
    ///
    /// ```rust
    /// use trueno_trainer::recovery::OperatorCommand;
    ///
    /// assert_eq!(
    ///     OperatorCommand::parse_many("se 500 c")?,
    ///     vec![
    ///         OperatorCommand::SaveCheckpoint,
    ///         OperatorCommand::ChangeLimit(Some(500)),
    ///         OperatorCommand::Continue,
    ///     ]
    /// );
    /// # Ok::<(), trueno_trainer::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`] for an empty line, an unknown letter,
    /// an `e` that is not last in its word or lacks an argument, or an
    /// argument that is neither a count nor `None`.
    pub fn parse_many(line: &str) -> Result<Vec<Self>> {
        let invalid = || Error::InvalidCommand(line.to_string());
        let mut words = line.split_whitespace();
        let mut commands = Vec::new();

        while let Some(word) = words.next() {
            let word = word.to_ascii_lowercase();
            for (position, letter) in word.char_indices() {
                let command = match letter {
                    'c' => Self::Continue,
                    's' => Self::SaveCheckpoint,
                    'q' => Self::Quit,
                    'i' => Self::Inspect,
                    'e' if position + 1 == word.len() => {
                        let argument = words.next().ok_or_else(invalid)?;
                        Self::ChangeLimit(parse_limit(argument)?)
                    }
                    _ => return Err(invalid()),
                };
                commands.push(command);
            }
        }

        if commands.is_empty() {
            return Err(invalid());
        }
        Ok(commands)
    }
}

fn parse_limit(argument: &str) -> Result<Option<u64>> {
    if argument.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    argument
        .parse()
        .map(Some)
        .map_err(|_| Error::InvalidCommand(format!("'{argument}' is not an iteration count")))
}

impl FromStr for OperatorCommand {
    type Err = Error;

    /// Parse exactly one command.
    fn from_str(s: &str) -> Result<Self> {
        match Self::parse_many(s)?.as_slice() {
            [command] => Ok(*command),
            _ => Err(Error::InvalidCommand(s.to_string())),
        }
    }
}

/// Point-in-time view of a run for the operator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    /// Run identifier
    pub run_id: String,
    /// Controller status
    pub status: ControllerStatus,
    /// Loop state
    pub state: LoopState,
    /// Last completed iteration
    pub completed: Option<u64>,
    /// Iteration a resume would start at
    pub next_iteration: u64,
    /// Limit `Continue` would train to
    pub limit: Option<u64>,
    /// Learning rate in effect
    pub learning_rate: Option<f64>,
    /// Best training cost so far
    pub best_cost: Option<f64>,
    /// Failed store calls so far
    pub store_errors: u64,
    /// Failed or panicked callbacks so far
    pub callback_failures: u64,
    /// Whether the prefetch worker is alive
    pub prefetch_running: bool,
}

/// Result of [`RecoveryController::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Training ran and ended like this
    Trained(LoopOutcome),
    /// Checkpoint written
    CheckpointSaved,
    /// Run abandoned
    Aborted,
    /// Limit changed; nothing ran
    LimitChanged(Option<u64>),
    /// Current state
    Snapshot(RunSnapshot),
}

/// Wraps a [`Trainer`] and turns recoverable endings into a paused state.
#[derive(Debug)]
pub struct RecoveryController {
    trainer: Trainer,
    limit: Option<u64>,
    status: ControllerStatus,
}

impl RecoveryController {
    /// Take control of `trainer`; the limit starts at its configured value.
    #[must_use]
    pub fn new(trainer: Trainer) -> Self {
        let limit = trainer.config().iteration_limit;
        Self {
            trainer,
            limit,
            status: ControllerStatus::Ready,
        }
    }

    /// Train up to `limit` (inclusive, `None` for unbounded) and remember it
    /// as the limit for `Continue`.
    ///
    /// Divergence pauses the controller instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] after an abort, or the loop's error for
    /// a fatal failure (the controller becomes `Failed`).
    pub fn train(&mut self, limit: Option<u64>) -> Result<LoopOutcome> {
        if self.status == ControllerStatus::Aborted {
            return Err(Error::InvalidState("run was aborted".into()));
        }
        self.limit = limit;

        let result = self.trainer.fit(limit);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_divergence() => {
                tracing::warn!(error = %e, "training diverged; waiting for operator");
                self.trainer.last_outcome().ok_or(e)?
            }
            Err(e) => {
                self.status = ControllerStatus::Failed;
                return Err(e);
            }
        };

        self.status = match outcome.state {
            LoopState::Interrupted | LoopState::Diverged => ControllerStatus::Paused,
            LoopState::Failed => ControllerStatus::Failed,
            _ => ControllerStatus::Finished,
        };
        if self.status == ControllerStatus::Paused {
            tracing::info!(
                run_id = self.trainer.run().run_id(),
                state = %outcome.state,
                iteration = outcome.iteration,
                "training paused"
            );
        }
        Ok(outcome)
    }

    /// Report the run state.
    #[must_use]
    pub fn inspect(&self) -> RunSnapshot {
        let run = self.trainer.run();
        RunSnapshot {
            run_id: run.run_id().to_string(),
            status: self.status,
            state: self.trainer.state(),
            completed: run.iteration(),
            next_iteration: run.next_iteration(),
            limit: self.limit,
            learning_rate: run.learning_rate(),
            best_cost: Some(run.best_cost()).filter(|cost| cost.is_finite()),
            store_errors: self.trainer.store_errors(),
            callback_failures: self.trainer.callback_failures(),
            prefetch_running: self.trainer.prefetch_running(),
        }
    }

    /// Save a checkpoint of the model at the last completed iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no iteration has completed yet,
    /// otherwise the model's checkpoint error.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.trainer.save_checkpoint()
    }

    /// Continue training after the last completed iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the controller is paused or
    /// finished, plus any error from [`train`](Self::train).
    pub fn resume(&mut self, extension: Extension) -> Result<LoopOutcome> {
        if !matches!(
            self.status,
            ControllerStatus::Paused | ControllerStatus::Finished
        ) {
            return Err(Error::InvalidState(format!(
                "cannot resume a {:?} controller",
                self.status
            )));
        }
        let limit = extension.limit_from(self.trainer.run().next_iteration())?;
        tracing::info!(
            run_id = self.trainer.run().run_id(),
            limit = ?limit,
            "resuming training"
        );
        self.train(limit)
    }

    /// Abandon the run. The run is marked `Aborted` in the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the run was already aborted.
    pub fn abort(&mut self) -> Result<()> {
        if self.status == ControllerStatus::Aborted {
            return Err(Error::InvalidState("run was already aborted".into()));
        }
        self.trainer.abort();
        self.status = ControllerStatus::Aborted;
        Ok(())
    }

    /// Execute one operator command.
    ///
    /// # Errors
    ///
    /// Propagates the error of the operation the command maps to.
    pub fn apply(&mut self, command: OperatorCommand) -> Result<CommandOutcome> {
        match command {
            OperatorCommand::Continue => {
                let extension = self
                    .limit
                    .map_or(Extension::Unbounded, Extension::UntilIteration);
                self.resume(extension).map(CommandOutcome::Trained)
            }
            OperatorCommand::SaveCheckpoint => {
                self.checkpoint().map(|()| CommandOutcome::CheckpointSaved)
            }
            OperatorCommand::Quit => self.abort().map(|()| CommandOutcome::Aborted),
            OperatorCommand::ChangeLimit(limit) => {
                self.limit = limit;
                tracing::info!(limit = ?limit, "iteration limit changed");
                Ok(CommandOutcome::LimitChanged(limit))
            }
            OperatorCommand::Inspect => Ok(CommandOutcome::Snapshot(self.inspect())),
        }
    }

    /// Execute commands in order, as parsed by
    /// [`OperatorCommand::parse_many`].
    ///
    /// Stops after a command that trains or aborts; the commands after it
    /// are dropped, so the operator decides again once the loop returns.
    ///
    /// # Errors
    ///
    /// Returns the first command error. Commands before it keep their effect.
    pub fn apply_all(
        &mut self,
        commands: impl IntoIterator<Item = OperatorCommand>,
    ) -> Result<Vec<CommandOutcome>> {
        let mut outcomes = Vec::new();
        for command in commands {
            let outcome = self.apply(command)?;
            let ends_turn = matches!(
                outcome,
                CommandOutcome::Trained(_) | CommandOutcome::Aborted
            );
            outcomes.push(outcome);
            if ends_turn {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Controller status.
    #[must_use]
    pub const fn status(&self) -> ControllerStatus {
        self.status
    }

    /// Limit `Continue` would train to.
    #[must_use]
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// The wrapped trainer.
    #[must_use]
    pub const fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Mutable access to the wrapped trainer.
    pub fn trainer_mut(&mut self) -> &mut Trainer {
        &mut self.trainer
    }

    /// Release the wrapped trainer.
    #[must_use]
    pub fn into_trainer(self) -> Trainer {
        self.trainer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("s".parse::<OperatorCommand>().unwrap(), OperatorCommand::SaveCheckpoint);
        assert_eq!("Q".parse::<OperatorCommand>().unwrap(), OperatorCommand::Quit);
        assert_eq!(" i ".parse::<OperatorCommand>().unwrap(), OperatorCommand::Inspect);
        assert_eq!(
            "e 150".parse::<OperatorCommand>().unwrap(),
            OperatorCommand::ChangeLimit(Some(150))
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for input in ["", "d", "e", "e ten", "c now", "e 1 2"] {
            assert!(
                matches!(input.parse::<OperatorCommand>(), Err(Error::InvalidCommand(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_many_splits_letters() {
        assert_eq!(
            OperatorCommand::parse_many("sc").unwrap(),
            vec![OperatorCommand::SaveCheckpoint, OperatorCommand::Continue]
        );
        assert_eq!(
            OperatorCommand::parse_many("I se None c").unwrap(),
            vec![
                OperatorCommand::Inspect,
                OperatorCommand::SaveCheckpoint,
                OperatorCommand::ChangeLimit(None),
                OperatorCommand::Continue,
            ]
        );
        assert_eq!(
            OperatorCommand::parse_many("e 9").unwrap(),
            vec![OperatorCommand::ChangeLimit(Some(9))]
        );
    }

    #[test]
    fn test_parse_many_rejects_bad_input() {
        for input in ["", "  ", "sx", "es 5", "se", "e 5 z", "e -1"] {
            assert!(
                matches!(OperatorCommand::parse_many(input), Err(Error::InvalidCommand(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_str_takes_one_command() {
        assert!("sc".parse::<OperatorCommand>().is_err());
        assert!("e 5 c".parse::<OperatorCommand>().is_err());
    }

    #[test]
    fn test_extension_limits() {
        assert_eq!(Extension::Additional(100).limit_from(51).unwrap(), Some(150));
        assert_eq!(Extension::Additional(1).limit_from(0).unwrap(), Some(0));
        assert_eq!(Extension::UntilIteration(7).limit_from(51).unwrap(), Some(7));
        assert_eq!(Extension::Unbounded.limit_from(3).unwrap(), None);
        assert!(Extension::Additional(0).limit_from(3).is_err());
    }
}
