//! Shared configuration for tether debug sessions.
//!
//! The crate defines the settings a session reads at start-up: the upper
//! bound applied to blocking waits, the telemetry filter and format, and the
//! default direction used when reconciling breakpoints. Settings are read
//! from a JSON document; any field left out falls back to the values in
//! [`defaults`].

mod defaults;
mod direction;
mod logging;
mod session;

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_REQUEST_TIMEOUT_MS, default_log_filter, default_log_filter_string,
    default_log_format, default_request_timeout_ms, default_sync_direction,
};
pub use direction::{SyncDirectionParseError, SyncDirectionSetting};
pub use logging::{LogFormat, LogFormatParseError};
pub use session::{ConfigError, SessionConfig};
