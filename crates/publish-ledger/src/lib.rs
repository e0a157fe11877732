//! Publish ledger for confirm-tracked publishing.
//!
//! This crate provides:
//! - PublishLedger: shared, ordered record of publishes awaiting confirmation
//! - DeliveryTag: per-ledger sequence handle used to confirm an entry

mod ledger;

pub use ledger::{DeliveryTag, PublishLedger};
