//! Mess configuration
//!
//! Loaded from TOML. Every section and key is optional; missing values fall
//! back to the defaults below.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::models::MealWeights;
use crate::retry::RetryPolicy;

/// Largest accepted meal weight (100 meal units)
const MAX_WEIGHT: u32 = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessConfig {
    pub database: DatabaseConfig,
    pub meals: MealPolicy,
    pub billing: BillingConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

/// When members may still change a day's meal counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MealPolicy {
    /// Hour of the meal date (UTC) after which the day counts as served
    pub cutoff_hour: u32,
    /// Hours after the cutoff during which corrections are still accepted
    pub grace_hours: u32,
}

impl Default for MealPolicy {
    fn default() -> Self {
        Self {
            cutoff_hour: 22,
            grace_hours: 24,
        }
    }
}

impl MealPolicy {
    /// Instant after which meals for `date` are locked
    pub fn edit_deadline(&self, date: NaiveDate) -> DateTime<Utc> {
        let cutoff = date
            .and_hms_opt(self.cutoff_hour.min(23), 0, 0)
            .unwrap_or_default()
            .and_utc();
        cutoff + Duration::hours(self.grace_hours as i64)
    }
}

/// What to do when a period has grocery cost but no meals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMealsPolicy {
    /// Fail with `NoMealsRecorded`
    #[default]
    Reject,
    /// Produce a bill where every meal share is zero
    ZeroBill,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub no_meals: NoMealsPolicy,
    /// Weights given to newly created hostels
    pub default_weights: MealWeights,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl MessConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: MessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meals.cutoff_hour > 23 {
            return Err(ConfigError::Invalid {
                key: "meals.cutoff_hour",
                reason: format!("{} is not an hour of the day", self.meals.cutoff_hour),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let w = &self.billing.default_weights;
        for (key, value) in [
            ("billing.default_weights.breakfast", w.breakfast),
            ("billing.default_weights.lunch", w.lunch),
            ("billing.default_weights.dinner", w.dinner),
        ] {
            if value > MAX_WEIGHT {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("{value} exceeds {MAX_WEIGHT}"),
                });
            }
        }
        Ok(())
    }

    /// Configured database path, or `mess.db` in the platform data directory
    pub fn database_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.database.path {
            return Some(path.clone());
        }
        ProjectDirs::from("dev", "onyx", "mess").map(|dirs| dirs.data_dir().join("mess.db"))
    }
}

pub(crate) fn max_weight() -> u32 {
    MAX_WEIGHT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MessConfig::from_toml("").unwrap();
        assert_eq!(config, MessConfig::default());
        assert_eq!(config.meals.cutoff_hour, 22);
        assert_eq!(config.billing.default_weights.breakfast, 50);
        assert_eq!(config.billing.no_meals, NoMealsPolicy::Reject);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[database]
path = "/tmp/mess-test.db"

[meals]
cutoff_hour = 20
grace_hours = 12

[billing]
no_meals = "zero_bill"

[billing.default_weights]
breakfast = 100
lunch = 100
dinner = 100

[retry]
max_attempts = 5
base_delay_ms = 5
"#;
        let config = MessConfig::from_toml(toml).unwrap();
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/mess-test.db")));
        assert_eq!(config.meals.grace_hours, 12);
        assert_eq!(config.billing.no_meals, NoMealsPolicy::ZeroBill);
        assert_eq!(config.billing.default_weights.breakfast, 100);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, RetryPolicy::default().max_delay_ms);
    }

    #[test]
    fn test_rejects_invalid_cutoff() {
        let err = MessConfig::from_toml("[meals]\ncutoff_hour = 24\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "meals.cutoff_hour", .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[meals]\ngrace_hours = 6").unwrap();

        let config = MessConfig::load(file.path()).unwrap();
        assert_eq!(config.meals.grace_hours, 6);
        assert_eq!(config.meals.cutoff_hour, 22);
    }

    #[test]
    fn test_edit_deadline() {
        let policy = MealPolicy::default();
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let deadline = policy.edit_deadline(date);
        assert_eq!(deadline.to_rfc3339(), "2025-01-02T22:00:00+00:00");
    }
}
