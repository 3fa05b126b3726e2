//! Engine Configuration
//!
//! Tunables for the executor, read from a YAML file. Every field has a
//! default, so an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`EngineConfig::store_dir`].
pub const STORE_DIR_ENV: &str = "ETLRUNNER_STORE_DIR";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often a paused run re-checks its control handle
    pub pause_poll_interval_ms: u64,

    /// How long the scheduler waits when only running steps remain
    pub running_poll_interval_ms: u64,

    pub notifications_enabled: bool,

    /// Refresh workflow metrics when a run finishes
    pub metrics_enabled: bool,

    /// Directory for the file-backed repository
    pub store_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pause_poll_interval_ms: 500,
            running_poll_interval_ms: 100,
            notifications_enabled: false,
            metrics_enabled: true,
            store_dir: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.merge_env();
        debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a YAML document. An empty document yields the
    /// defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.merge_env();
        config
    }

    fn merge_env(&mut self) {
        if let Ok(dir) = std::env::var(STORE_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.store_dir = Some(PathBuf::from(dir));
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pause_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "pause_poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.running_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "running_poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }

    pub fn running_poll_interval(&self) -> Duration {
        Duration::from_millis(self.running_poll_interval_ms)
    }
}
