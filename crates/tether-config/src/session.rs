//! Session-wide settings and their JSON loader.

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults::{
    default_log_filter_string, default_log_format, default_request_timeout_ms,
    default_sync_direction,
};
use crate::direction::SyncDirectionSetting;
use crate::logging::LogFormat;

/// Settings consumed by a debug session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound, in milliseconds, for blocking waits on remote calls.
    pub request_timeout_ms: u64,
    /// Log filter expression in `tracing_subscriber::EnvFilter` syntax.
    pub log_filter: String,
    /// Output format for telemetry.
    pub log_format: LogFormat,
    /// Direction used when breakpoint synchronization is requested without
    /// an explicit direction.
    pub sync_direction: SyncDirectionSetting,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            sync_direction: default_sync_direction(),
        }
    }
}

impl SessionConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields
    /// and [`ConfigError::ZeroTimeout`] when the timeout is zero.
    pub fn from_json_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(document).map_err(ConfigError::Parse)?;
        config.validate()
    }

    /// Reads and parses a configuration document from `reader`.
    ///
    /// # Errors
    ///
    /// Same as [`SessionConfig::from_json_str`]; I/O failures surface as
    /// [`ConfigError::Parse`].
    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader).map_err(ConfigError::Parse)?;
        config.validate()
    }

    /// Blocking wait bound as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Configured telemetry format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Default breakpoint synchronization direction.
    #[must_use]
    pub const fn sync_direction(&self) -> SyncDirectionSetting {
        self.sync_direction
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(self)
    }
}

/// Errors raised while loading a [`SessionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document was not valid JSON or contained unknown fields.
    #[error("invalid session configuration: {0}")]
    Parse(#[source] serde_json::Error),
    /// A zero timeout would make every blocking wait fail immediately.
    #[error("request_timeout_ms must be greater than zero")]
    ZeroTimeout,
}
