//! Configuration loading, path resolution, and validation.
//!
//! Focuses on I/O and filesystem-related helpers for config management.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFailed(String),
    #[error("failed to parse config: {0}")]
    ParseFailed(String),
    #[error("missing $HOME, unable to resolve config directory")]
    MissingHome,
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|err| ConfigError::ReadFailed(err.to_string()))?;
        let config: Config =
            toml::from_str(&contents).map_err(|err| ConfigError::ParseFailed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location, if present.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_config_path()?;
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load_from_path(&path)
    }

    /// Reject configurations the executor cannot act on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.name.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster.name must not be empty".into()));
        }

        let mut chart_names = BTreeSet::new();
        for chart in &self.charts {
            if chart.name.trim().is_empty() {
                return Err(ConfigError::Invalid("chart name must not be empty".into()));
            }
            if !chart_names.insert(chart.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate chart name: {}",
                    chart.name
                )));
            }
        }

        let mut provider_names = BTreeSet::new();
        for provider in &self.providers {
            if !provider_names.insert(provider.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider name: {}",
                    provider.name
                )));
            }
            if provider.package.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider {} has an empty package reference",
                    provider.name
                )));
            }
        }

        if self.registry.enabled && self.registry.port == 0 {
            return Err(ConfigError::Invalid(
                "registry.port must be nonzero when the registry is enabled".into(),
            ));
        }

        Ok(())
    }

    /// Return the default config directory based on XDG or $HOME.
    pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg).join("kubenest"));
        }
        let home = env::var("HOME").map_err(|_| ConfigError::MissingHome)?;
        Ok(PathBuf::from(home).join(".config").join("kubenest"))
    }

    /// Return the default config file path.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }
}
