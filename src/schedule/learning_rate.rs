//! Piecewise-constant learning-rate schedule

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Rate used when no entry covers an iteration.
pub const DEFAULT_LEARNING_RATE: f64 = 1e-2;

/// Maps the first iteration of each phase to its learning rate.
///
/// The rate at iteration `i` is the value of the largest key ≤ `i`.
///
/// ```rust
/// use std::collections::BTreeMap;
/// use trueno_trainer::schedule::LearningRateSchedule;
///
/// let schedule = LearningRateSchedule::new(BTreeMap::from([(0, 1e-2), (100, 1e-3)]))?;
/// assert_eq!(schedule.rate_at(99), 1e-2);
/// assert_eq!(schedule.rate_at(100), 1e-3);
/// assert_eq!(schedule.rate_at(5_000), 1e-3);
/// # Ok::<(), trueno_trainer::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u64, f64>", into = "BTreeMap<u64, f64>")]
pub struct LearningRateSchedule {
    rates: BTreeMap<u64, f64>,
}

impl LearningRateSchedule {
    /// Build a schedule from explicit entries.
    ///
    /// An empty map falls back to [`DEFAULT_LEARNING_RATE`] everywhere.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] if any rate is not finite and positive.
    pub fn new(rates: BTreeMap<u64, f64>) -> Result<Self> {
        if let Some((iteration, rate)) = rates
            .iter()
            .find(|(_, rate)| !rate.is_finite() || **rate <= 0.0)
        {
            return Err(Error::InvalidSchedule(format!(
                "learning rate at iteration {iteration} must be finite and positive, got {rate}"
            )));
        }
        Ok(Self { rates })
    }

    /// Same rate for every iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] if `rate` is not finite and positive.
    pub fn constant(rate: f64) -> Result<Self> {
        Self::new(BTreeMap::from([(0, rate)]))
    }

    /// Learning rate in effect at `iteration`.
    #[must_use]
    pub fn rate_at(&self, iteration: u64) -> f64 {
        self.rates
            .range(..=iteration)
            .next_back()
            .map_or(DEFAULT_LEARNING_RATE, |(_, rate)| *rate)
    }

    /// Whether a phase starts exactly at `iteration`.
    #[must_use]
    pub fn has_entry_at(&self, iteration: u64) -> bool {
        self.rates.contains_key(&iteration)
    }

    /// Registered entries.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<u64, f64> {
        &self.rates
    }
}

impl Default for LearningRateSchedule {
    fn default() -> Self {
        Self {
            rates: BTreeMap::from([(0, DEFAULT_LEARNING_RATE)]),
        }
    }
}

impl TryFrom<BTreeMap<u64, f64>> for LearningRateSchedule {
    type Error = Error;

    fn try_from(rates: BTreeMap<u64, f64>) -> Result<Self> {
        Self::new(rates)
    }
}

impl From<LearningRateSchedule> for BTreeMap<u64, f64> {
    fn from(schedule: LearningRateSchedule) -> Self {
        schedule.rates
    }
}
