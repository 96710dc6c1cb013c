use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Step sizes for the spaced-repetition scheduler. Ease values are stored
/// scaled by 100, so `250` means an ease factor of 2.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_ease: i32,
    pub min_ease: i32,
    pub lapse_penalty: i32,
    pub max_ease_step: i32,
    pub pass_threshold: u8,
    pub perfect_recall_bonus: i32,
    pub memorized_threshold: u8,
    pub max_interval_days: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_ease: 250,
            min_ease: 130,
            lapse_penalty: 20,
            max_ease_step: 20,
            pass_threshold: 3,
            perfect_recall_bonus: 0,
            memorized_threshold: 4,
            max_interval_days: 36_500,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.min_ease <= 0 {
            return Err(EngineError::Config("min_ease must be positive".to_string()));
        }
        if self.default_ease < self.min_ease {
            return Err(EngineError::Config(format!(
                "default_ease ({}) is below min_ease ({})",
                self.default_ease, self.min_ease
            )));
        }
        if self.lapse_penalty < 0 || self.max_ease_step < 0 {
            return Err(EngineError::Config(
                "lapse_penalty and max_ease_step must not be negative".to_string(),
            ));
        }
        if self.max_interval_days < 1 {
            return Err(EngineError::Config(
                "max_interval_days must be at least 1".to_string(),
            ));
        }
        if self.pass_threshold > 5 || self.memorized_threshold > 5 {
            return Err(EngineError::Config(
                "quality thresholds must be between 0 and 5".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables for the whole engine, usually read from a TOML file.
///
/// ```toml
/// [scheduler]
/// min_ease = 130
/// lapse_penalty = 20
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|err| EngineError::Config(err.to_string()))?;
        config.scheduler.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str("[scheduler]\nlapse_penalty = 30\n").unwrap();
        assert_eq!(config.scheduler.lapse_penalty, 30);
        assert_eq!(config.scheduler.min_ease, 130);
        assert_eq!(config.scheduler.default_ease, 250);
    }

    #[test]
    fn default_below_floor_is_rejected() {
        let err = EngineConfig::from_toml_str("[scheduler]\ndefault_ease = 100\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let err = EngineConfig::from_toml_str("[scheduler\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
