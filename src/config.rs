//! Protocol bounds and timeouts.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Timeouts are in seconds unless the name says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub min_channel_timeout: u64,
    pub max_channel_timeout: u64,
    pub min_transfer_timeout: u64,
    pub max_transfer_timeout: u64,
    /// How long to wait for the counterparty to answer an update.
    pub message_timeout_ms: u64,
    /// Capacity of each of the two per-channel update queues.
    pub queue_backlog: usize,
    /// How often an outbound update is retried after the channel had to be
    /// synced first.
    pub max_sync_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_channel_timeout: 60 * 60,
            max_channel_timeout: 60 * 60 * 24 * 30,
            min_transfer_timeout: 60 * 5,
            max_transfer_timeout: 60 * 60 * 24 * 15,
            message_timeout_ms: 30_000,
            queue_backlog: 64,
            max_sync_attempts: 1,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails
    /// [Config::validate].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string. Missing keys use the default.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_channel_timeout > self.max_channel_timeout {
            return Err(ConfigError::Validation(format!(
                "min_channel_timeout {} above max_channel_timeout {}",
                self.min_channel_timeout, self.max_channel_timeout
            )));
        }
        if self.min_transfer_timeout > self.max_transfer_timeout {
            return Err(ConfigError::Validation(format!(
                "min_transfer_timeout {} above max_transfer_timeout {}",
                self.min_transfer_timeout, self.max_transfer_timeout
            )));
        }
        if self.queue_backlog == 0 {
            return Err(ConfigError::Validation(
                "queue_backlog must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}
