//! Configuration for exchange lifecycles.

use crate::{ConfigError, ConfigResult, ExchangeOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default capacity of an exchange's command inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Default capacity of an exchange's event broadcast.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "EXCHANGE_LIFECYCLE_LOG_LEVEL";

/// Lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Queued caller operations per exchange before `publish`/`check` wait.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    /// Buffered lifecycle events per exchange for slow subscribers.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Declared exchanges.
    #[serde(default)]
    pub exchanges: Vec<ExchangeOptions>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_inbox_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            exchanges: Vec::new(),
        }
    }
}

impl LifecycleConfig {
    /// Create a new config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from a JSON file. Environment overrides still apply.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: LifecycleConfig = serde_json::from_str(&content)?;
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            let level = level.trim();
            if !level.is_empty() {
                self.log_level = level.to_string();
            }
        }
    }

    /// Check capacities and the declared exchanges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "inboxCapacity must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "eventCapacity must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for exchange in &self.exchanges {
            exchange
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(exchange.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "exchange {} declared more than once",
                    exchange.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a declared exchange by name.
    pub fn exchange(&self, name: &str) -> Option<&ExchangeOptions> {
        self.exchanges.iter().find(|e| e.name == name)
    }
}
