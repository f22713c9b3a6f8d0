//! Structured telemetry for debug sessions.
//!
//! Embedding hosts usually install their own subscriber; this module is for
//! standalone tools and tests that want the session's log settings honoured.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use tether_config::{LogFormat, SessionConfig};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another subscriber was already installed globally.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber described by `config`.
///
/// Only the first successful call installs anything; later calls return a
/// handle without touching global state, whatever their configuration.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed filter expression and
/// [`TelemetryError::Subscriber`] if a foreign subscriber is already set.
pub fn initialise(config: &SessionConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|()| TelemetryHandle)
}

fn install_subscriber(config: &SessionConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
