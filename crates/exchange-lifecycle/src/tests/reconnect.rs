//! Reconnect: redefine on a new channel, replay once bindings are back.

use super::harness::{settle, spawn_publish, within, Harness};
use crate::{ExchangeEvent, LifecycleState, Message};

async fn publish_all(exchange: &crate::Exchange, keys: &[&str]) {
    for key in keys {
        exchange.publish(Message::new(*key, "x")).await.unwrap();
    }
}

#[tokio::test]
async fn reconnect_replays_unconfirmed_after_bindings_completed() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;
    publish_all(&exchange, &["m1", "m2", "m3"]).await;

    let first = harness.factory.channel(0);
    let confirmed = first.published()[0].tag;
    assert!(exchange.ledger().confirm(confirmed));
    assert_eq!(exchange.pending_count(), 2);

    harness.connection.fire_reconnected();
    within(exchange.wait_for_state(LifecycleState::Reconnected))
        .await
        .unwrap();
    assert_eq!(harness.factory.opened(), 2);

    let second = harness.factory.channel(1);
    assert!(second.published_keys().is_empty());

    harness.topology.fire_bindings_completed();
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();

    assert_eq!(second.published_keys(), vec!["m2", "m3"]);
    assert_eq!(first.published_keys(), vec!["m1", "m2", "m3"]);
    // Replayed messages are recorded again under fresh tags
    assert_eq!(exchange.pending_count(), 2);
    let replayed: Vec<u64> = second.published().iter().map(|e| e.tag.value()).collect();
    assert_eq!(replayed, vec![4, 5]);
}

#[tokio::test]
async fn bindings_before_redefinition_still_trigger_replay() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;
    publish_all(&exchange, &["m1"]).await;

    harness.factory.hold_defines(true);
    harness.connection.fire_reconnected();
    harness.factory.wait_for_channels(2).await;
    assert_eq!(exchange.state(), LifecycleState::Reconnecting);

    harness.topology.fire_bindings_completed();
    settle().await;
    let second = harness.factory.channel(1);
    assert!(second.published_keys().is_empty());

    second.complete_define(Ok(()));
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();
    assert_eq!(second.published_keys(), vec!["m1"]);
}

#[tokio::test]
async fn publish_during_reconnect_follows_replay() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;
    publish_all(&exchange, &["old"]).await;

    harness.connection.fire_reconnected();
    within(exchange.wait_for_state(LifecycleState::Reconnected))
        .await
        .unwrap();

    let late = spawn_publish(&exchange, "new");
    settle().await;
    assert!(!late.is_finished());

    harness.topology.fire_bindings_completed();
    within(late).await.unwrap().unwrap();

    assert_eq!(
        harness.factory.channel(1).published_keys(),
        vec!["old", "new"]
    );
}

#[tokio::test]
async fn failed_replay_keeps_messages_for_next_bindings() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;
    publish_all(&exchange, &["m1", "m2"]).await;

    harness.connection.fire_reconnected();
    within(exchange.wait_for_state(LifecycleState::Reconnected))
        .await
        .unwrap();

    harness.factory.fail_publishes(true);
    harness.topology.fire_bindings_completed();
    settle().await;

    assert_eq!(exchange.state(), LifecycleState::Reconnected);
    assert_eq!(exchange.pending_count(), 2);

    harness.factory.fail_publishes(false);
    harness.topology.fire_bindings_completed();
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();

    assert_eq!(
        harness.factory.channel(1).published_keys(),
        vec!["m1", "m2"]
    );
}

#[tokio::test]
async fn bindings_completed_while_ready_does_nothing() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;
    publish_all(&exchange, &["m1"]).await;

    harness.topology.fire_bindings_completed();
    settle().await;

    assert_eq!(exchange.state(), LifecycleState::Ready);
    assert_eq!(harness.factory.opened(), 1);
    assert_eq!(harness.factory.channel(0).published_keys(), vec!["m1"]);
}

#[tokio::test]
async fn bindings_of_abandoned_reconnect_do_not_replay_the_next_one() {
    let harness = Harness::new();
    let exchange = harness.ready_exchange().await;
    publish_all(&exchange, &["m1"]).await;

    // Reconnect whose bindings arrive, then its channel is revoked
    harness.factory.hold_defines(true);
    harness.connection.fire_reconnected();
    harness.factory.wait_for_channels(2).await;
    harness.topology.fire_bindings_completed();
    settle().await;
    harness.factory.channel(1).release();
    harness.factory.wait_for_channels(3).await;
    harness.factory.channel(2).complete_define(Ok(()));
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();

    // Next reconnect must wait for its own bindings
    harness.factory.hold_defines(false);
    harness.connection.fire_reconnected();
    harness.factory.wait_for_channels(4).await;
    within(exchange.wait_for_state(LifecycleState::Reconnected))
        .await
        .unwrap();
    settle().await;

    let latest = harness.factory.channel(3);
    assert_eq!(exchange.state(), LifecycleState::Reconnected);
    assert!(latest.published_keys().is_empty());

    harness.topology.fire_bindings_completed();
    within(exchange.wait_for_state(LifecycleState::Ready))
        .await
        .unwrap();
    assert_eq!(latest.published_keys(), vec!["m1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_and_bindings_raised_back_to_back_still_replay() {
    for _ in 0..20 {
        let harness = Harness::new();
        let exchange = harness.ready_exchange().await;
        publish_all(&exchange, &["m1"]).await;
        let mut events = exchange.subscribe();

        harness.connection.fire_reconnected();
        harness.topology.fire_bindings_completed();

        within(async {
            loop {
                if let ExchangeEvent::StateChanged {
                    from: LifecycleState::Reconnected,
                    to: LifecycleState::Ready,
                } = events.recv().await.unwrap()
                {
                    break;
                }
            }
        })
        .await;
        assert_eq!(harness.factory.channel(1).published_keys(), vec!["m1"]);
    }
}
