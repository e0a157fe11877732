//! Message envelope handed to transport channels.

use crate::ExchangeOptions;
use chrono::{DateTime, Utc};
use publish_ledger::DeliveryTag;
use serde::{Deserialize, Serialize};

/// AMQP delivery mode for transient messages.
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// AMQP delivery mode for persistent messages.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// A message accepted for publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID.
    pub message_id: String,
    /// Routing key used by the exchange.
    pub routing_key: String,
    /// Raw payload.
    pub body: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub headers: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Overrides the exchange's default delivery mode when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a raw body.
    pub fn new(routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            routing_key: routing_key.into(),
            body: body.into(),
            content_type: None,
            headers: serde_json::Map::new(),
            correlation_id: None,
            persistent: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a message whose body is `payload` encoded as JSON.
    pub fn json<T: Serialize>(
        routing_key: impl Into<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        let body = serde_json::to_vec(payload)?;
        let mut message = Self::new(routing_key, body);
        message.content_type = Some("application/json".to_string());
        Ok(message)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Delivery mode to put on the wire for this message on `exchange`.
    pub fn delivery_mode(&self, exchange: &ExchangeOptions) -> u8 {
        if self.persistent.unwrap_or(exchange.persistent) {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        }
    }
}

/// A message together with its ledger tag.
///
/// The channel confirms `tag` against the ledger once the broker acks.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub tag: DeliveryTag,
    pub message: Message,
}
