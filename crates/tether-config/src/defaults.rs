use crate::direction::SyncDirectionSetting;
use crate::logging::LogFormat;

/// Default upper bound, in milliseconds, for blocking waits on remote calls.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default log filter expression used by sessions.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by sessions.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default blocking wait bound in milliseconds.
#[must_use]
pub const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Default breakpoint synchronization direction.
#[must_use]
pub const fn default_sync_direction() -> SyncDirectionSetting {
    SyncDirectionSetting::Merge
}
