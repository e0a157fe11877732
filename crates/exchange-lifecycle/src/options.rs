//! Exchange identity and declaration options.

use crate::{ExchangeError, ExchangeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Broker exchange type. Opaque to the lifecycle; passed through to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(ExchangeError::InvalidOptions(format!(
                "unknown exchange type: {}",
                other
            ))),
        }
    }
}

/// Declaration options for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOptions {
    /// Exchange name on the broker.
    pub name: String,
    /// Exchange type.
    #[serde(rename = "type")]
    pub kind: ExchangeKind,
    /// Survive broker restarts.
    #[serde(default = "default_durable")]
    pub durable: bool,
    /// Delete once the last binding is removed.
    #[serde(default)]
    pub auto_delete: bool,
    /// Not publishable by clients, only by exchange-to-exchange bindings.
    #[serde(default)]
    pub internal: bool,
    /// Default delivery mode for messages that do not set one.
    #[serde(default)]
    pub persistent: bool,
    /// Exchange receiving unroutable messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_exchange: Option<String>,
    /// Extra declaration arguments.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

fn default_durable() -> bool {
    true
}

impl ExchangeOptions {
    /// Options with broker defaults for the given name and type.
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: default_durable(),
            auto_delete: false,
            internal: false,
            persistent: false,
            alternate_exchange: None,
            arguments: serde_json::Map::new(),
        }
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_alternate_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.alternate_exchange = Some(exchange.into());
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Reject options that cannot be declared.
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.name.trim().is_empty() {
            return Err(ExchangeError::InvalidOptions(
                "exchange name must not be empty".to_string(),
            ));
        }
        if self.alternate_exchange.as_deref() == Some(self.name.as_str()) {
            return Err(ExchangeError::InvalidOptions(format!(
                "exchange {} cannot be its own alternate",
                self.name
            )));
        }
        Ok(())
    }
}
