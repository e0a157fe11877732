//! Exchange lifecycle error types.

use thiserror::Error;

/// Error reported by a transport channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The broker rejected the exchange declaration
    #[error("Exchange declaration rejected: {0}")]
    Define(String),

    /// The channel refused a publish
    #[error("Publish rejected: {0}")]
    Publish(String),

    /// Broker-side teardown failed
    #[error("Teardown failed: {0}")]
    Destroy(String),

    /// The channel is gone
    #[error("Channel closed")]
    Closed,
}

/// Error surfaced to callers of an exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Definition failed; the exchange is parked in `failed`.
    #[error("Exchange {exchange} failed to define: {source}")]
    DefinitionFailed {
        exchange: String,
        source: ChannelError,
    },

    /// Channel teardown failed; the exchange is parked in `failed`.
    #[error("Exchange {exchange} failed to tear down: {source}")]
    TeardownFailed {
        exchange: String,
        source: ChannelError,
    },

    /// A single publish was refused by the channel.
    #[error("Publish to exchange {exchange} failed: {source}")]
    PublishFailed {
        exchange: String,
        source: ChannelError,
    },

    /// The exchange worker is no longer running.
    #[error("Exchange {exchange} worker stopped")]
    WorkerStopped { exchange: String },

    /// Invalid exchange options
    #[error("Invalid exchange options: {0}")]
    InvalidOptions(String),
}

/// Result type alias using ExchangeError.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Semantic validation failure
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
