//! Configuration for the OTP runtime
//!
//! All tunables default to the values the desktop app ships with; an
//! optional YAML file in the user's home directory overrides them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Runtime tunables for the scheduler, governor and projector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum concurrently outstanding code-generation calls
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_generations: usize,

    /// Quiet period before a search query is published, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub search_debounce_ms: u64,

    /// Delay between losing foreground and degrading resources, in seconds
    #[serde(default = "default_grace_secs")]
    pub background_grace_secs: u64,

    /// Hard ceiling on rendered entries while foregrounded
    #[serde(default = "default_foreground_cap")]
    pub max_visible_foreground: usize,

    /// Rendered-entry cap while backgrounded
    #[serde(default = "default_background_cap")]
    pub max_visible_background: usize,

    /// Timer tick cadence, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_grace_secs() -> u64 {
    5
}

fn default_foreground_cap() -> usize {
    50
}

fn default_background_cap() -> usize {
    10
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations: default_max_concurrent(),
            search_debounce_ms: default_debounce_ms(),
            background_grace_secs: default_grace_secs(),
            max_visible_foreground: default_foreground_cap(),
            max_visible_background: default_background_cap(),
            tick_interval_ms: default_tick_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".otp-runtime").join("config.yaml"))
    }

    /// Load configuration from the default path, falling back to defaults
    /// when no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)?;
        let config: RuntimeConfig = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;
        std::fs::write(&path, contents)?;

        Ok(())
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_generations == 0 {
            return Err(
                ConfigError::Invalid("max_concurrent_generations must be > 0".to_string()).into(),
            );
        }
        if self.max_visible_foreground == 0 || self.max_visible_background == 0 {
            return Err(ConfigError::Invalid("visible caps must be > 0".to_string()).into());
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".to_string()).into());
        }
        Ok(())
    }

    /// Debounce quiet period as a `Duration`.
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    /// Background grace delay as a `Duration`.
    pub fn grace_delay(&self) -> Duration {
        Duration::from_secs(self.background_grace_secs)
    }

    /// Timer tick cadence as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_concurrent_generations, 5);
        assert_eq!(config.search_debounce_ms, 300);
        assert_eq!(config.background_grace_secs, 5);
        assert_eq!(config.max_visible_foreground, 50);
        assert_eq!(config.max_visible_background, 10);
        assert_eq!(config.tick_interval_ms, 1000);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: RuntimeConfig =
            serde_yaml::from_str("max_concurrent_generations: 3").expect("parse");
        assert_eq!(config.max_concurrent_generations, 3);
        assert_eq!(config.search_debounce_ms, 300);
        assert_eq!(config.max_visible_foreground, 50);
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = RuntimeConfig {
            max_concurrent_generations: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let config = RuntimeConfig {
            max_visible_background: 0,
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.yaml");

        let config = RuntimeConfig {
            max_concurrent_generations: 8,
            search_debounce_ms: 150,
            ..RuntimeConfig::default()
        };
        config.save_to(path.clone()).expect("save");

        let loaded = RuntimeConfig::load_from(path).expect("load");
        assert_eq!(loaded.max_concurrent_generations, 8);
        assert_eq!(loaded.search_debounce_ms, 150);
        assert_eq!(loaded.background_grace_secs, 5);
    }

    #[test]
    fn test_durations() {
        let config = RuntimeConfig::default();
        assert_eq!(config.debounce_window(), Duration::from_millis(300));
        assert_eq!(config.grace_delay(), Duration::from_secs(5));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
    }
}
