//! Reconnect-safe lifecycle for a single broker exchange.
//!
//! This crate provides:
//! - Exchange: handle to a per-exchange worker exposing `check`, `publish`
//!   and `destroy`, which survive reconnects and channel revocation
//! - TransportChannel / ChannelFactory: the broker-facing channel seam
//! - Connection / Topology: the external event sources an exchange follows
//! - LifecycleConfig: capacities, log level and declared exchanges
//!
//! Publishes accepted while the exchange is not ready are parked and
//! replayed in order once it is. Messages handed to a channel stay in the
//! exchange's publish ledger until the broker confirms them, and whatever is
//! still unconfirmed when a reconnect completes is republished once the
//! topology has restored its bindings.

mod channel;
mod config;
mod error;
mod events;
mod exchange;
mod logging;
mod machine;
mod message;
mod options;

#[cfg(test)]
mod tests;

pub use channel::{
    release_signal, ChannelFactory, OpenedChannel, ReleaseSignal, ReleaseTrigger, TransportChannel,
};
pub use config::{
    LifecycleConfig, DEFAULT_EVENT_CAPACITY, DEFAULT_INBOX_CAPACITY, DEFAULT_LOG_LEVEL,
    LOG_LEVEL_ENV,
};
pub use error::{ChannelError, ConfigError, ConfigResult, ExchangeError, ExchangeResult};
pub use events::{Connection, ExchangeEvent, Subscription, Topology};
pub use exchange::Exchange;
pub use logging::{init_logging, LOG_FORMAT_ENV};
pub use machine::LifecycleState;
pub use message::{Envelope, Message, DELIVERY_MODE_PERSISTENT, DELIVERY_MODE_TRANSIENT};
pub use options::{ExchangeKind, ExchangeOptions};

pub use publish_ledger::{DeliveryTag, PublishLedger};
