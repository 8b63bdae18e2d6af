//! TOML-based engine configuration.
//!
//! Holds the rule thresholds used by the progression engine:
//! - Difficulty adviser window and thresholds
//! - Free-tier size and crown-challenge mastery gates
//! - Streak calendar offset
//! - Achievement near-miss threshold
//!
//! Configuration is stored at `~/.config/sprout/config.toml`.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;

/// Difficulty adviser configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyConfig {
    /// Maximum attempts considered.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Attempts older than this are ignored.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_escalate_threshold")]
    pub escalate_threshold: f64,
    #[serde(default = "default_deescalate_threshold")]
    pub deescalate_threshold: f64,
    /// Consecutive attempts at the current tier needed before a change.
    #[serde(default = "default_confirm_count")]
    pub confirm_count: usize,
}

/// Unlock resolver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConfig {
    /// Activities per subject available on the trial tier.
    #[serde(default = "default_free_activities")]
    pub free_activities_per_subject: usize,
    #[serde(default = "default_crown_threshold")]
    pub crown_mastery_threshold: f64,
    /// Recent subject attempts used for the crown mastery mean.
    #[serde(default = "default_window_size")]
    pub crown_window: usize,
    /// Consecutive 3-star completions on the tier below Hard.
    #[serde(default = "default_crown_run")]
    pub crown_perfect_run: usize,
}

/// Streak tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Offset used to decide which calendar day an attempt falls on.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Achievement evaluator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementConfig {
    #[serde(default = "default_near_miss")]
    pub near_miss_threshold: f64,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/sprout/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub difficulty: DifficultyConfig,
    #[serde(default)]
    pub unlock: UnlockConfig,
    #[serde(default)]
    pub streak: StreakConfig,
    #[serde(default)]
    pub achievements: AchievementConfig,
    /// Apply difficulty recommendations to the child profile automatically.
    #[serde(default = "default_true")]
    pub auto_apply_difficulty: bool,
    /// Content pack path. The built-in pack is used when unset.
    #[serde(default)]
    pub content_pack: Option<PathBuf>,
}

// Default functions
fn default_window_size() -> usize {
    10
}
fn default_window_days() -> i64 {
    30
}
fn default_escalate_threshold() -> f64 {
    2.5
}
fn default_deescalate_threshold() -> f64 {
    1.5
}
fn default_confirm_count() -> usize {
    2
}
fn default_free_activities() -> usize {
    3
}
fn default_crown_threshold() -> f64 {
    2.7
}
fn default_crown_run() -> usize {
    3
}
fn default_near_miss() -> f64 {
    0.75
}
fn default_true() -> bool {
    true
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_days: default_window_days(),
            escalate_threshold: default_escalate_threshold(),
            deescalate_threshold: default_deescalate_threshold(),
            confirm_count: default_confirm_count(),
        }
    }
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            free_activities_per_subject: default_free_activities(),
            crown_mastery_threshold: default_crown_threshold(),
            crown_window: default_window_size(),
            crown_perfect_run: default_crown_run(),
        }
    }
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
        }
    }
}

impl StreakConfig {
    /// The configured offset, falling back to UTC when out of range.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Default for AchievementConfig {
    fn default() -> Self {
        Self {
            near_miss_threshold: default_near_miss(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            difficulty: DifficultyConfig::default(),
            unlock: UnlockConfig::default(),
            streak: StreakConfig::default(),
            achievements: AchievementConfig::default(),
            auto_apply_difficulty: true,
            content_pack: None,
        }
    }
}

impl EngineConfig {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(invalid("config key is empty".into()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| invalid("unknown config key".into()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| invalid("unknown config key".into()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| invalid("unknown config key".into()))?;
        }

        Err(invalid("unknown config key".into()))
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()
            .map_err(|e| ConfigError::DataDir(e.to_string()))?
            .join("config.toml"))
    }

    /// Load from the data directory, writing defaults if no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing defaults if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(err) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
