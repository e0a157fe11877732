//! Ledger of publishes that have been handed to a channel but not yet
//! confirmed by the broker.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Handle for one recorded publish.
///
/// Tags increase monotonically within a ledger and are never reissued,
/// not even after a `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Raw sequence value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct LedgerState<M> {
    next_tag: u64,
    /// Keyed by tag, so iteration order is submission order.
    pending: BTreeMap<u64, M>,
}

/// Shared record of in-flight publishes.
///
/// Cloning the ledger yields another handle onto the same entries; the
/// exchange records through one handle while its transport channel confirms
/// through another.
pub struct PublishLedger<M> {
    state: Arc<Mutex<LedgerState<M>>>,
}

impl<M> Clone for PublishLedger<M> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<M> Default for PublishLedger<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for PublishLedger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PublishLedger")
            .field("pending", &state.pending.len())
            .field("next_tag", &state.next_tag)
            .finish()
    }
}

impl<M> PublishLedger<M> {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                next_tag: 1,
                pending: BTreeMap::new(),
            })),
        }
    }

    /// Append a pending entry and return its tag.
    pub fn record(&self, message: M) -> DeliveryTag {
        let mut state = self.state.lock();
        let tag = state.next_tag;
        state.next_tag += 1;
        state.pending.insert(tag, message);
        trace!(tag, pending = state.pending.len(), "Recorded publish");
        DeliveryTag(tag)
    }

    /// Remove a pending entry.
    ///
    /// Returns false when the entry was already gone; duplicate confirmations
    /// from the transport are harmless.
    pub fn confirm(&self, tag: DeliveryTag) -> bool {
        let removed = self.state.lock().pending.remove(&tag.0).is_some();
        if !removed {
            trace!(tag = tag.0, "Confirm for unknown or already confirmed tag");
        }
        removed
    }

    /// Remove every pending entry with a tag up to and including `tag`.
    ///
    /// Mirrors a broker acknowledgement carrying the `multiple` flag.
    pub fn confirm_through(&self, tag: DeliveryTag) -> usize {
        let mut state = self.state.lock();
        let retained = state.pending.split_off(&tag.0.saturating_add(1));
        let confirmed = std::mem::replace(&mut state.pending, retained).len();
        trace!(tag = tag.0, confirmed, "Confirmed through tag");
        confirmed
    }

    /// Drain every pending entry, in submission order.
    ///
    /// The ledger is empty afterwards, so anything recorded while the
    /// returned batch is being replayed lands in a fresh batch.
    pub fn reset(&self) -> Vec<M> {
        let drained = std::mem::take(&mut self.state.lock().pending);
        if !drained.is_empty() {
            debug!(count = drained.len(), "Reset publish ledger");
        }
        drained.into_values().collect()
    }

    /// Number of pending entries.
    pub fn count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Tags of the pending entries, in submission order.
    pub fn pending_tags(&self) -> Vec<DeliveryTag> {
        self.state
            .lock()
            .pending
            .keys()
            .copied()
            .map(DeliveryTag)
            .collect()
    }
}
