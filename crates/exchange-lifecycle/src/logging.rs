//! Logging initialization for exchange lifecycles.
//!
//! Thin wrapper over the observability package so applications embedding
//! this crate get the same structured output as the rest of the workspace.

use observability::{LogConfig, LogFormat};

/// Environment variable selecting the output format (`compact` or `json`).
pub const LOG_FORMAT_ENV: &str = "EXCHANGE_LIFECYCLE_LOG_FORMAT";

const SERVICE_NAME: &str = "exchange-lifecycle";

/// Initialize logging at `level` unless a subscriber is already installed.
///
/// Returns false when another subscriber was installed first.
pub fn init_logging(level: &str) -> bool {
    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();

    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        format,
        ..Default::default()
    })
}
