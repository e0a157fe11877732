//! # Observability
//!
//! Centralized logging setup for the exchange lifecycle workspace.
//!
//! Crates are **log producers**: they use plain `tracing` macros with
//! structured fields and never decide where output goes. A binary (or a
//! test) calls `observability::init()` once and picks the sink here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("publisher");
//!     tracing::info!("service started");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "publisher".into(),
//!     default_level: "debug".into(),
//!     format: observability::LogFormat::Json,
//!     log_path: Some("/var/log/publisher.jsonl".into()),
//!     also_stderr: true,
//! });
//! ```
//!
//! `RUST_LOG` always wins over `default_level`.

mod writer;

use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub use writer::LogFileWriter;

/// Line format of the log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, logged once at startup.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Line format.
    pub format: LogFormat,

    /// Append logs to this file instead of stderr.
    pub log_path: Option<PathBuf>,

    /// Also emit to stderr when `log_path` is set.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            format: LogFormat::Compact,
            log_path: None,
            also_stderr: false,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging with default settings.
///
/// Returns false if a global subscriber was already installed.
pub fn init(service_name: &str) -> bool {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Returns false if a global subscriber was already installed; the existing
/// one is left in place.
pub fn init_with_config(config: LogConfig) -> bool {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_error = None;

    match &config.log_path {
        Some(path) => match LogFileWriter::new(path) {
            Ok(writer) => {
                layers.push(file_layer(config.format, writer, &config.default_level));
                if config.also_stderr {
                    layers.push(stderr_layer(config.format, &config.default_level));
                }
            }
            Err(e) => {
                file_error = Some(e);
                layers.push(stderr_layer(config.format, &config.default_level));
            }
        },
        None => layers.push(stderr_layer(config.format, &config.default_level)),
    }

    if tracing_subscriber::registry().with(layers).try_init().is_err() {
        return false;
    }

    if let Some(e) = file_error {
        tracing::warn!(
            path = ?config.log_path,
            error = %e,
            "Could not open log file, logging to stderr"
        );
    }
    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        "observability initialized"
    );
    true
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn file_layer(format: LogFormat, writer: LogFileWriter, default_level: &str) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
    match format {
        LogFormat::Json => layer
            .json()
            .with_filter(env_filter(default_level))
            .boxed(),
        LogFormat::Compact => layer
            .compact()
            .with_filter(env_filter(default_level))
            .boxed(),
    }
}

fn stderr_layer(format: LogFormat, default_level: &str) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    match format {
        LogFormat::Json => layer
            .json()
            .with_filter(env_filter(default_level))
            .boxed(),
        LogFormat::Compact => layer
            .compact()
            .with_filter(env_filter(default_level))
            .boxed(),
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
