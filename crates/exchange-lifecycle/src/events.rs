//! Connection/topology collaborators and lifecycle notifications.

use crate::machine::Input;
use crate::{Exchange, ExchangeError, LifecycleState};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// The broker connection an exchange lives on.
pub trait Connection: Send + Sync {
    /// Connection name, used for diagnostics.
    fn name(&self) -> &str;

    /// Subscribe to "transport re-established" notifications.
    fn reconnected(&self) -> broadcast::Receiver<()>;

    /// Register an exchange with the connection.
    fn add_exchange(&self, exchange: Exchange);
}

/// The topology manager declaring bindings for the connection.
pub trait Topology: Send + Sync {
    /// Subscribe to "all bindings for this generation are in place" notifications.
    fn bindings_completed(&self) -> broadcast::Receiver<()>;
}

/// Notification published by an exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    /// The exchange is declared on the broker (entered `ready` or `reconnected`).
    Defined,
    /// The exchange entered `failed`.
    Failed(ExchangeError),
    /// Any state change.
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// The exchange's live subscriptions to its connection and topology.
///
/// One task forwards both sources into the exchange's inbox, so their
/// notifications reach the lifecycle in the order they were raised. When both
/// are pending, the connection goes first: a `reconnected` always precedes
/// the `bindings-completed` of the generation it started.
/// Dropping the subscription unsubscribes from both.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn forward(
        mut reconnected: broadcast::Receiver<()>,
        mut bindings: broadcast::Receiver<()>,
        inbox: mpsc::UnboundedSender<Input>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut connection_open = true;
            let mut topology_open = true;
            while connection_open || topology_open {
                let input = tokio::select! {
                    biased;
                    event = reconnected.recv(), if connection_open => match event {
                        // Missed notifications still mean the event happened.
                        Ok(()) | Err(RecvError::Lagged(_)) => Input::ConnectionReconnected,
                        Err(RecvError::Closed) => {
                            debug!(source = "connection", "Event source closed");
                            connection_open = false;
                            continue;
                        }
                    },
                    event = bindings.recv(), if topology_open => match event {
                        Ok(()) | Err(RecvError::Lagged(_)) => Input::BindingsCompleted,
                        Err(RecvError::Closed) => {
                            debug!(source = "topology", "Event source closed");
                            topology_open = false;
                            continue;
                        }
                    },
                };
                if inbox.send(input).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
