//! Tracing/logging setup shared by every binary that embeds the engine.

/// Subscriber installation.
pub mod tracing;

pub use crate::tracing::{init_with, LogFormat, ObservabilityError};

/// Initialize process-wide JSON logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let _ = init_with(LogFormat::Json);
}
