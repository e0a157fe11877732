//! Released channels are replaced exactly once.

use super::harness::{settle, within, ChannelCall, Harness};
use crate::{ExchangeKind, LifecycleState, Message};

#[tokio::test]
async fn release_while_ready_recreates_channel_once() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;

    harness.factory.channel(0).release();
    harness.factory.wait_for_channels(2).await;
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();
    settle().await;

    assert_eq!(harness.factory.opened(), 2);
    assert_eq!(
        harness.factory.calls(),
        vec![ChannelCall::Define(0), ChannelCall::Define(1)]
    );

    exchange.publish(Message::new("after", "x")).await.unwrap();
    assert_eq!(harness.factory.channel(1).published_keys(), vec!["after"]);
    assert!(harness.factory.channel(0).published_keys().is_empty());
}

#[tokio::test]
async fn late_definition_of_released_channel_is_ignored() {
    let harness = Harness::new();
    harness.factory.hold_defines(true);
    let exchange = harness.spawn("orders", ExchangeKind::Topic);
    harness.factory.wait_for_channels(1).await;

    let first = harness.factory.channel(0);
    first.release();
    harness.factory.wait_for_channels(2).await;

    first.complete_define(Ok(()));
    settle().await;
    assert_eq!(exchange.state(), LifecycleState::Initializing);

    harness.factory.channel(1).complete_define(Ok(()));
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();
    assert_eq!(harness.factory.opened(), 2);
}

#[tokio::test]
async fn release_of_replaced_channel_is_ignored() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;

    harness.connection.fire_reconnected();
    within(exchange.wait_for_state(LifecycleState::Reconnected))
        .await
        .unwrap();

    // The first channel's watcher is gone with the channel
    harness.factory.channel(0).release();
    settle().await;

    assert_eq!(exchange.state(), LifecycleState::Reconnected);
    assert_eq!(harness.factory.opened(), 2);
}
