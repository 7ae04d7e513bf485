//! Tracing subscriber installation.
//!
//! Filtering comes from `RUST_LOG` (default `info`). Services emit spans via
//! `#[tracing::instrument]`; denials and dropped billing events log at
//! `warn` with the account id as a field.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers.
    #[default]
    Json,
    /// Human-readable, for local runs and tests.
    Pretty,
}

#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Another global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Install the global subscriber with the given format.
pub fn init_with(format: LogFormat) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.with_test_writer().try_init(),
    };
    installed.map_err(|e| ObservabilityError::AlreadyInstalled(e.to_string()))
}
