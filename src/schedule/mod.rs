//! Callback schedules driven by the iteration loop
//!
//! Two ordered collections map iterations to actions:
//! - repeating callbacks fire whenever `iteration % period == 0` (iteration 0 included)
//! - one-shot callbacks fire once, at the iteration equal to their trigger
//!
//! At any iteration repeating callbacks run before one-shot callbacks, each
//! group in registration order, so periodic housekeeping sees the state
//! before one-shot actions touch it.
//!
//! # Example
//!
//! ```rust
//! use trueno_trainer::schedule::{CallbackId, LoopHandle, ScheduleTable};
//!
//! let mut table = ScheduleTable::new();
//! let every_100 = table.every(100, |_: &mut LoopHandle<'_>| Ok(()))?;
//! let at_250 = table.at(250, |_: &mut LoopHandle<'_>| Ok(()))?;
//!
//! assert_eq!(table.due(200), vec![every_100]);
//! assert_eq!(table.due(250), vec![at_250]);
//! assert!(table.due(101).is_empty());
//! assert!(table.every(0, |_: &mut LoopHandle<'_>| Ok(())).is_err());
//! # Ok::<(), trueno_trainer::Error>(())
//! ```

pub mod builtin;
mod learning_rate;

pub use learning_rate::{LearningRateSchedule, DEFAULT_LEARNING_RATE};

use crate::channel::InterruptSignal;
use crate::experiment::RunRecord;
use crate::model::TrainableModel;
use crate::recorder::RunRecorder;
use crate::{Error, Result};

/// View of the loop handed to callbacks.
///
/// Callbacks run synchronously on the loop thread between iterations, after
/// the iteration's metric row has been recorded.
pub struct LoopHandle<'a> {
    iteration: u64,
    run: &'a RunRecord,
    model: &'a mut dyn TrainableModel,
    recorder: &'a mut RunRecorder,
    interrupt: &'a InterruptSignal,
}

impl<'a> LoopHandle<'a> {
    /// Assemble a handle for `iteration`.
    pub fn new(
        iteration: u64,
        run: &'a RunRecord,
        model: &'a mut dyn TrainableModel,
        recorder: &'a mut RunRecorder,
        interrupt: &'a InterruptSignal,
    ) -> Self {
        Self {
            iteration,
            run,
            model,
            recorder,
            interrupt,
        }
    }

    /// Iteration that just completed.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Current run state.
    #[must_use]
    pub const fn run(&self) -> &RunRecord {
        self.run
    }

    /// The model being trained.
    pub fn model(&mut self) -> &mut dyn TrainableModel {
        self.model
    }

    /// Recorder for persisting extra rows.
    pub fn recorder(&mut self) -> &mut RunRecorder {
        self.recorder
    }

    /// Ask the loop to stop as `Interrupted` before the next iteration.
    pub fn request_interrupt(&self) {
        self.interrupt.raise();
    }
}

/// Action invoked by the schedule.
///
/// Any `FnMut(&mut LoopHandle<'_>) -> Result<()>` closure is a callback.
/// Errors are logged by the loop and never stop training.
pub trait Callback {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Run the action.
    ///
    /// # Errors
    ///
    /// Any error is logged and counted by the loop; training continues.
    fn invoke(&mut self, handle: &mut LoopHandle<'_>) -> Result<()>;
}

impl<F> Callback for F
where
    F: FnMut(&mut LoopHandle<'_>) -> Result<()>,
{
    fn name(&self) -> &str {
        std::any::type_name::<F>()
    }

    fn invoke(&mut self, handle: &mut LoopHandle<'_>) -> Result<()> {
        self(handle)
    }
}

/// Stable identifier of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackId {
    /// Index into the repeating collection
    Repeating(usize),
    /// Index into the one-shot collection
    OneShot(usize),
}

struct RepeatingEntry {
    period: u64,
    callback: Box<dyn Callback>,
}

struct OneShotEntry {
    iteration: u64,
    fired: bool,
    callback: Box<dyn Callback>,
}

/// Registered one-shot and repeating callbacks.
#[derive(Default)]
pub struct ScheduleTable {
    repeating: Vec<RepeatingEntry>,
    one_shot: Vec<OneShotEntry>,
}

impl ScheduleTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `trigger`.
    ///
    /// For a repeating callback `trigger` is the period; for a one-shot
    /// callback it is the exact iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] for a period ≤ 0 or a negative
    /// one-shot iteration.
    pub fn register(
        &mut self,
        trigger: i64,
        callback: Box<dyn Callback>,
        repeating: bool,
    ) -> Result<CallbackId> {
        if repeating {
            let period = u64::try_from(trigger)
                .ok()
                .filter(|period| *period > 0)
                .ok_or_else(|| {
                    Error::InvalidSchedule(format!(
                        "period of '{}' must be positive, got {trigger}",
                        callback.name()
                    ))
                })?;
            self.repeating.push(RepeatingEntry { period, callback });
            Ok(CallbackId::Repeating(self.repeating.len() - 1))
        } else {
            let iteration = u64::try_from(trigger).map_err(|_| {
                Error::InvalidSchedule(format!(
                    "iteration of '{}' must be non-negative, got {trigger}",
                    callback.name()
                ))
            })?;
            self.one_shot.push(OneShotEntry {
                iteration,
                fired: false,
                callback,
            });
            Ok(CallbackId::OneShot(self.one_shot.len() - 1))
        }
    }

    /// Register a repeating callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] for a period ≤ 0.
    pub fn every(&mut self, period: i64, callback: impl Callback + 'static) -> Result<CallbackId> {
        self.register(period, Box::new(callback), true)
    }

    /// Register a one-shot callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] for a negative iteration.
    pub fn at(&mut self, iteration: i64, callback: impl Callback + 'static) -> Result<CallbackId> {
        self.register(iteration, Box::new(callback), false)
    }

    /// Callbacks due at `iteration`: repeating first, then one-shot, each in
    /// registration order. Does not modify the table.
    #[must_use]
    pub fn due(&self, iteration: u64) -> Vec<CallbackId> {
        let repeating = self
            .repeating
            .iter()
            .enumerate()
            .filter(|(_, entry)| iteration % entry.period == 0)
            .map(|(index, _)| CallbackId::Repeating(index));
        let one_shot = self
            .one_shot
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.fired && entry.iteration == iteration)
            .map(|(index, _)| CallbackId::OneShot(index));
        repeating.chain(one_shot).collect()
    }

    /// Mutable access to a registered callback.
    pub fn callback_mut(&mut self, id: CallbackId) -> Option<&mut dyn Callback> {
        let slot = match id {
            CallbackId::Repeating(index) => &mut self.repeating.get_mut(index)?.callback,
            CallbackId::OneShot(index) => &mut self.one_shot.get_mut(index)?.callback,
        };
        let callback: &mut dyn Callback = slot.as_mut();
        Some(callback)
    }

    /// Record that a one-shot callback has run. No-op for repeating ids.
    pub fn mark_fired(&mut self, id: CallbackId) {
        if let CallbackId::OneShot(index) = id {
            if let Some(entry) = self.one_shot.get_mut(index) {
                entry.fired = true;
            }
        }
    }

    /// Whether a one-shot callback has already run.
    #[must_use]
    pub fn has_fired(&self, id: CallbackId) -> bool {
        match id {
            CallbackId::OneShot(index) => self.one_shot.get(index).is_some_and(|e| e.fired),
            CallbackId::Repeating(_) => false,
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.repeating.len() + self.one_shot.len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ScheduleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleTable")
            .field(
                "repeating",
                &self
                    .repeating
                    .iter()
                    .map(|e| (e.period, e.callback.name()))
                    .collect::<Vec<_>>(),
            )
            .field(
                "one_shot",
                &self
                    .one_shot
                    .iter()
                    .map(|e| (e.iteration, e.fired, e.callback.name()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut LoopHandle<'_>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_repeating_before_one_shot() {
        let mut table = ScheduleTable::new();
        let shot = table.at(10, noop).unwrap();
        let every_5 = table.every(5, noop).unwrap();
        let every_2 = table.every(2, noop).unwrap();

        assert_eq!(table.due(10), vec![every_5, every_2, shot]);
    }

    #[test]
    fn test_repeating_fires_at_zero() {
        let mut table = ScheduleTable::new();
        let id = table.every(7, noop).unwrap();
        assert_eq!(table.due(0), vec![id]);
        assert_eq!(table.due(14), vec![id]);
        assert!(table.due(15).is_empty());
    }

    #[test]
    fn test_invalid_periods_rejected() {
        let mut table = ScheduleTable::new();
        assert!(matches!(table.every(0, noop), Err(Error::InvalidSchedule(_))));
        assert!(matches!(table.every(-3, noop), Err(Error::InvalidSchedule(_))));
        assert!(matches!(table.at(-1, noop), Err(Error::InvalidSchedule(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_due_is_side_effect_free() {
        let mut table = ScheduleTable::new();
        let id = table.at(3, noop).unwrap();
        assert_eq!(table.due(3), vec![id]);
        assert_eq!(table.due(3), vec![id]);
        assert!(!table.has_fired(id));
    }

    #[test]
    fn test_fired_one_shot_never_due_again() {
        let mut table = ScheduleTable::new();
        let id = table.at(3, noop).unwrap();
        table.mark_fired(id);
        assert!(table.has_fired(id));
        assert!(table.due(3).is_empty());
    }

    #[test]
    fn test_callback_mut_unknown_id() {
        let mut table = ScheduleTable::new();
        assert!(table.callback_mut(CallbackId::OneShot(0)).is_none());
        table.every(1, noop).unwrap();
        assert!(table.callback_mut(CallbackId::Repeating(0)).is_some());
        assert_eq!(table.len(), 1);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: a repeating callback is due exactly at multiples of its period
            #[test]
            fn prop_repeating_due_iff_divisible(period in 1i64..500, iteration in 0u64..100_000) {
                let mut table = ScheduleTable::new();
                let id = table.every(period, noop).unwrap();
                let due = table.due(iteration).contains(&id);
                prop_assert_eq!(due, iteration % period.unsigned_abs() == 0);
            }

            /// Property: a one-shot callback is due only at its trigger
            #[test]
            fn prop_one_shot_due_only_at_trigger(trigger in 0i64..1000, iteration in 0u64..1000) {
                let mut table = ScheduleTable::new();
                let id = table.at(trigger, noop).unwrap();
                prop_assert_eq!(
                    table.due(iteration).contains(&id),
                    iteration == trigger.unsigned_abs()
                );
            }
        }
    }
}
