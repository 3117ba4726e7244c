//! Trainer configuration parsing and validation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::LossAggregation;
use crate::schedule::{LearningRateSchedule, DEFAULT_LEARNING_RATE};
use crate::{Error, Result};

/// What to do when the run identifier already exists in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Refuse to start (default)
    #[default]
    Abort,
    /// Delete the existing run and all of its rows, then start fresh
    Delete,
    /// Adopt the persisted run and continue after its last completed iteration
    Resume,
}

impl ConflictPolicy {
    /// Get policy name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Delete => "delete",
            Self::Resume => "resume",
        }
    }
}

/// Settings for a [`Trainer`](crate::trainer::Trainer).
///
/// Every field has a default, so `{}` is a valid configuration.
///
/// # Example
///
/// ```rust
/// use trueno_trainer::config::{ConflictPolicy, TrainerConfig};
///
/// let config = TrainerConfig::from_json_str(
///     r#"{"iteration_limit": 200, "learning_rates": {"0": 0.01, "100": 0.001}, "on_conflict": "resume"}"#,
/// )?;
/// assert_eq!(config.iteration_limit, Some(200));
/// assert_eq!(config.on_conflict, ConflictPolicy::Resume);
/// assert_eq!(config.learning_rate_schedule()?.rate_at(150), 0.001);
/// # Ok::<(), trueno_trainer::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Initial limit of a [`RecoveryController`](crate::recovery::RecoveryController).
    /// `None` trains until interrupted or the source runs dry.
    pub iteration_limit: Option<u64>,

    /// Learning-rate phases: first iteration → rate.
    pub learning_rates: BTreeMap<u64, f64>,

    /// How loss tensors are reduced to a scalar.
    pub loss_aggregation: LossAggregation,

    /// Validate every N iterations (requires a validation source).
    pub validation_period: Option<i64>,

    /// Checkpoint every N iterations.
    pub checkpoint_period: Option<i64>,

    /// Run identifier collision handling.
    pub on_conflict: ConflictPolicy,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            iteration_limit: None,
            learning_rates: BTreeMap::from([(0, DEFAULT_LEARNING_RATE)]),
            loss_aggregation: LossAggregation::default(),
            validation_period: None,
            checkpoint_period: None,
            on_conflict: ConflictPolicy::default(),
        }
    }
}

impl TrainerConfig {
    /// Start a builder from the defaults.
    #[must_use]
    pub fn builder() -> TrainerConfigBuilder {
        TrainerConfigBuilder::default()
    }

    /// Parse a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not a valid configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid trainer config: {e}")))
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, or [`Error::Config`]
    /// if its contents are invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Save the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] for a bad learning rate or a
    /// non-positive period.
    pub fn validate(&self) -> Result<()> {
        self.learning_rate_schedule()?;
        for (name, period) in [
            ("validation_period", self.validation_period),
            ("checkpoint_period", self.checkpoint_period),
        ] {
            if let Some(period) = period.filter(|period| *period <= 0) {
                return Err(Error::InvalidSchedule(format!(
                    "{name} must be positive, got {period}"
                )));
            }
        }
        Ok(())
    }

    /// Build the learning-rate schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] if any rate is not finite and positive.
    pub fn learning_rate_schedule(&self) -> Result<LearningRateSchedule> {
        LearningRateSchedule::new(self.learning_rates.clone())
    }
}

/// Builder for [`TrainerConfig`].
#[derive(Debug, Clone, Default)]
pub struct TrainerConfigBuilder {
    config: TrainerConfig,
}

impl TrainerConfigBuilder {
    /// Set the default iteration limit.
    #[must_use]
    pub const fn iteration_limit(mut self, limit: u64) -> Self {
        self.config.iteration_limit = Some(limit);
        self
    }

    /// Replace the learning-rate phases.
    #[must_use]
    pub fn learning_rates(mut self, rates: impl IntoIterator<Item = (u64, f64)>) -> Self {
        self.config.learning_rates = rates.into_iter().collect();
        self
    }

    /// Set the loss aggregation.
    #[must_use]
    pub const fn loss_aggregation(mut self, aggregation: LossAggregation) -> Self {
        self.config.loss_aggregation = aggregation;
        self
    }

    /// Validate every `period` iterations.
    #[must_use]
    pub const fn validation_period(mut self, period: i64) -> Self {
        self.config.validation_period = Some(period);
        self
    }

    /// Checkpoint every `period` iterations.
    #[must_use]
    pub const fn checkpoint_period(mut self, period: i64) -> Self {
        self.config.checkpoint_period = Some(period);
        self
    }

    /// Set the run identifier collision policy.
    #[must_use]
    pub const fn on_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.config.on_conflict = policy;
        self
    }

    /// Finish the configuration.
    #[must_use]
    pub fn build(self) -> TrainerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config = TrainerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, TrainerConfig::default());
        assert_eq!(config.on_conflict, ConflictPolicy::Abort);
        assert_eq!(config.loss_aggregation, LossAggregation::Mean);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = TrainerConfig::from_json_str(r#"{"on_conflict": "overwrite"}"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = TrainerConfig::builder().checkpoint_period(0).build();
        assert!(matches!(config.validate(), Err(Error::InvalidSchedule(_))));

        let config = TrainerConfig::builder()
            .learning_rates([(0, 0.01), (50, -1.0)])
            .build();
        assert!(matches!(config.validate(), Err(Error::InvalidSchedule(_))));
    }

    #[test]
    fn test_builder() {
        let config = TrainerConfig::builder()
            .iteration_limit(500)
            .loss_aggregation(LossAggregation::Sum)
            .validation_period(100)
            .on_conflict(ConflictPolicy::Delete)
            .build();
        assert_eq!(config.iteration_limit, Some(500));
        assert_eq!(config.validation_period, Some(100));
        assert_eq!(config.on_conflict.as_str(), "delete");
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "trueno-trainer-config-{}.json",
            std::process::id()
        ));
        let config = TrainerConfig::builder()
            .iteration_limit(10)
            .learning_rates([(0, 0.1), (5, 0.05)])
            .build();
        config.save(&path).unwrap();
        let loaded = TrainerConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = TrainerConfig::load("/nonexistent/trainer.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
