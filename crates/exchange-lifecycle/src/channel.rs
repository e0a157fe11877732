//! Transport channel seam.
//!
//! The channel is what actually speaks to the broker. An exchange owns one
//! channel per activation and replaces it wholesale whenever it re-defines.

use crate::{ChannelError, Envelope, ExchangeOptions, Message};
use async_trait::async_trait;
use publish_ledger::PublishLedger;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Broker-facing channel for a single exchange.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Declare the exchange on the broker.
    async fn define(&self) -> Result<(), ChannelError>;

    /// Hand one message to the broker.
    ///
    /// Resolves once the message is accepted for sending. Broker confirmation
    /// arrives later and is applied to the ledger by the channel itself.
    async fn publish(&self, envelope: Envelope) -> Result<(), ChannelError>;

    /// Tear down local resources and the broker-side declaration.
    async fn destroy(&self) -> Result<(), ChannelError>;
}

/// Creates a channel for each exchange activation.
pub trait ChannelFactory: Send + Sync {
    /// Build a fresh channel. `ledger` is the exchange's publish ledger; the
    /// channel confirms entries on it as broker acks arrive.
    fn open(&self, options: &ExchangeOptions, ledger: PublishLedger<Message>) -> OpenedChannel;
}

/// A channel plus its revocation signal.
pub struct OpenedChannel {
    pub channel: Arc<dyn TransportChannel>,
    pub released: ReleaseSignal,
}

impl OpenedChannel {
    pub fn new(channel: Arc<dyn TransportChannel>, released: ReleaseSignal) -> Self {
        Self { channel, released }
    }
}

/// Fires the one-shot "released" signal of a channel.
#[derive(Debug)]
pub struct ReleaseTrigger(oneshot::Sender<()>);

impl ReleaseTrigger {
    /// Signal that the broker revoked the channel. Returns false if nobody
    /// is listening any more.
    pub fn release(self) -> bool {
        self.0.send(()).is_ok()
    }
}

/// Receiving half of a channel's "released" signal.
#[derive(Debug)]
pub struct ReleaseSignal(oneshot::Receiver<()>);

impl ReleaseSignal {
    /// Wait for the channel to be released.
    ///
    /// Returns false when the trigger was dropped without firing, which
    /// means the channel went away without being revoked.
    pub async fn released(self) -> bool {
        self.0.await.is_ok()
    }
}

/// Build a linked release trigger/signal pair.
pub fn release_signal() -> (ReleaseTrigger, ReleaseSignal) {
    let (tx, rx) = oneshot::channel();
    (ReleaseTrigger(tx), ReleaseSignal(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_signal_fires() {
        let (trigger, signal) = release_signal();
        assert!(trigger.release());
        assert!(signal.released().await);
    }

    #[tokio::test]
    async fn dropped_trigger_is_not_a_release() {
        let (trigger, signal) = release_signal();
        drop(trigger);
        assert!(!signal.released().await);
    }

    #[test]
    fn release_without_listener() {
        let (trigger, signal) = release_signal();
        drop(signal);
        assert!(!trigger.release());
    }
}
