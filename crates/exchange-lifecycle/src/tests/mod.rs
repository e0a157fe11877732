//! Scenario tests for a running exchange.
//!
//! - `harness.rs`    - Mock channel factory, connection and topology
//! - `startup.rs`    - Registration, first definition, notifications
//! - `publishing.rs` - Deferred and in-line publishes, check
//! - `reconnect.rs`  - Reconnect, bindings-completed and replay
//! - `release.rs`    - Broker-revoked channels
//! - `failure.rs`    - Definition failure
//! - `teardown.rs`   - Destroy and reactivation

mod reconnect;
mod release;
