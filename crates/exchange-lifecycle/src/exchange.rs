//! Exchange handle and its worker task.
//!
//! Every exchange runs one worker that owns the lifecycle, the current
//! channel and the external subscriptions. Callers, the connection, the
//! topology and channel completions all reach it as `Input`s, so lifecycle
//! state is only ever touched from that one task.

use crate::machine::{Effect, Input, Lifecycle, Reply};
use crate::{
    ChannelError, ChannelFactory, Connection, Envelope, ExchangeError, ExchangeEvent,
    ExchangeKind, ExchangeOptions, ExchangeResult, LifecycleConfig, LifecycleState, Message,
    Subscription, Topology, TransportChannel,
};
use publish_ledger::PublishLedger;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a running exchange lifecycle.
///
/// Cheap to clone. The worker stops once every handle is dropped.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeShared>,
}

struct ExchangeShared {
    options: ExchangeOptions,
    inbox: mpsc::Sender<Input>,
    events: broadcast::Sender<ExchangeEvent>,
    state: watch::Receiver<LifecycleState>,
    ledger: PublishLedger<Message>,
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("name", &self.inner.options.name)
            .field("kind", &self.inner.options.kind)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Exchange {
    /// Start the lifecycle for `options` and register it with `connection`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        options: ExchangeOptions,
        connection: Arc<dyn Connection>,
        topology: Arc<dyn Topology>,
        factory: Arc<dyn ChannelFactory>,
        config: &LifecycleConfig,
    ) -> ExchangeResult<Self> {
        options.validate()?;
        config
            .validate()
            .map_err(|e| ExchangeError::InvalidOptions(e.to_string()))?;

        let (inbox, commands) = mpsc::channel(config.inbox_capacity);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(LifecycleState::Setup);
        let ledger = PublishLedger::new();

        let exchange = Self {
            inner: Arc::new(ExchangeShared {
                options: options.clone(),
                inbox,
                events: events.clone(),
                state: state_rx,
                ledger: ledger.clone(),
            }),
        };

        let worker = ExchangeWorker {
            machine: Lifecycle::new(options.name.clone()),
            options,
            connection: connection.clone(),
            topology,
            factory,
            ledger,
            channel: None,
            release_watch: None,
            subscription: None,
            internal: internal_tx,
            events,
            state: state_tx,
        };
        tokio::spawn(worker.run(commands, internal_rx));

        connection.add_exchange(exchange.clone());
        Ok(exchange)
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.inner.options.kind
    }

    pub fn options(&self) -> &ExchangeOptions {
        &self.inner.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    /// Wait until the lifecycle is in `target`.
    pub async fn wait_for_state(&self, target: LifecycleState) -> ExchangeResult<()> {
        let mut state = self.inner.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| self.stopped())
    }

    /// Publishes accepted but not yet confirmed by the broker.
    pub fn pending_count(&self) -> usize {
        self.inner.ledger.count()
    }

    /// The exchange's publish ledger.
    pub fn ledger(&self) -> &PublishLedger<Message> {
        &self.inner.ledger
    }

    /// Subscribe to `Defined`, `Failed` and state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once the exchange is ready; reject with the stored cause once failed.
    pub async fn check(&self) -> ExchangeResult<()> {
        self.call(Input::Check).await
    }

    /// Publish `message`.
    ///
    /// Resolves when the channel accepted the message for sending. Outside
    /// `ready` the publish waits for the exchange to get there.
    pub async fn publish(&self, message: Message) -> ExchangeResult<()> {
        debug!(
            exchange = %self.name(),
            state = %self.state(),
            routing_key = %message.routing_key,
            "Publish called"
        );
        self.call(|reply| Input::Publish(message, reply)).await
    }

    /// Tear the exchange down. Resolves once it is `destroyed`.
    pub async fn destroy(&self) -> ExchangeResult<()> {
        debug!(
            exchange = %self.name(),
            pending = self.pending_count(),
            "Destroy called"
        );
        self.call(Input::Destroy).await
    }

    async fn call<F>(&self, make: F) -> ExchangeResult<()>
    where
        F: FnOnce(Reply) -> Input,
    {
        let (reply, outcome) = oneshot::channel();
        self.inner
            .inbox
            .send(make(reply))
            .await
            .map_err(|_| self.stopped())?;
        outcome.await.map_err(|_| self.stopped())?
    }

    fn stopped(&self) -> ExchangeError {
        ExchangeError::WorkerStopped {
            exchange: self.name().to_string(),
        }
    }
}

struct ExchangeWorker {
    options: ExchangeOptions,
    machine: Lifecycle,
    connection: Arc<dyn Connection>,
    topology: Arc<dyn Topology>,
    factory: Arc<dyn ChannelFactory>,
    ledger: PublishLedger<Message>,
    channel: Option<Arc<dyn TransportChannel>>,
    release_watch: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
    /// Completions and external notifications.
    internal: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<ExchangeEvent>,
    state: watch::Sender<LifecycleState>,
}

impl ExchangeWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Input>,
        mut internal: mpsc::UnboundedReceiver<Input>,
    ) {
        self.apply(Input::Start).await;

        loop {
            // Lifecycle progress before new caller work.
            let input = tokio::select! {
                biased;
                Some(input) = internal.recv() => input,
                command = commands.recv() => match command {
                    Some(input) => input,
                    None => break,
                },
            };
            self.apply(input).await;
        }

        debug!(exchange = %self.options.name, "Exchange worker stopped (all handles dropped)");
        self.unlisten();
        self.drop_channel();
    }

    async fn apply(&mut self, input: Input) {
        let effects = self.machine.handle(input);
        for effect in effects {
            self.execute(effect).await;
        }
        self.state.send_replace(self.machine.state());
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Listen => self.listen(),
            Effect::Unlisten => self.unlisten(),
            Effect::OpenChannel { activation } => self.open_channel(activation),
            Effect::DropChannel => self.drop_channel(),
            Effect::Publish { message, reply } => {
                let result = self.publish(message).await;
                let _ = reply.send(result);
            }
            Effect::Replay { activation } => self.replay(activation),
            Effect::DestroyChannel { activation } => self.destroy_channel(activation),
            Effect::ReportUnconfirmed => {
                let pending = self.ledger.count();
                if pending > 0 {
                    warn!(
                        exchange = %self.options.name,
                        kind = %self.options.kind,
                        connection = %self.connection.name(),
                        pending,
                        "Exchange destroyed with unconfirmed messages"
                    );
                }
            }
            Effect::ReportReplayFailure { error } => {
                error!(
                    exchange = %self.options.name,
                    kind = %self.options.kind,
                    connection = %self.connection.name(),
                    pending = self.ledger.count(),
                    error = %error,
                    "Failed to republish undelivered messages"
                );
            }
            Effect::Notify(event) => self.notify(event),
            Effect::Reply { reply, result } => {
                let _ = reply.send(result);
            }
        }
    }

    fn notify(&self, event: ExchangeEvent) {
        match &event {
            ExchangeEvent::StateChanged { from, to } => debug!(
                exchange = %self.options.name,
                from = %from,
                to = %to,
                activation = self.machine.activation(),
                deferred = self.machine.deferred_len(),
                "Exchange state changed"
            ),
            ExchangeEvent::Defined => debug!(exchange = %self.options.name, "Exchange defined"),
            ExchangeEvent::Failed(cause) => error!(
                exchange = %self.options.name,
                kind = %self.options.kind,
                connection = %self.connection.name(),
                error = %cause,
                "Exchange failed"
            ),
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn listen(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        self.subscription = Some(Subscription::forward(
            self.connection.reconnected(),
            self.topology.bindings_completed(),
            self.internal.clone(),
        ));
    }

    fn unlisten(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn open_channel(&mut self, activation: u64) {
        self.drop_channel();

        let opened = self.factory.open(&self.options, self.ledger.clone());
        let channel = opened.channel;
        self.channel = Some(channel.clone());

        let released = opened.released;
        let inbox = self.internal.clone();
        let exchange = self.options.name.clone();
        self.release_watch = Some(tokio::spawn(async move {
            if released.released().await {
                info!(exchange = %exchange, activation, "Channel released by broker");
                let _ = inbox.send(Input::Released { activation });
            }
        }));

        debug!(exchange = %self.options.name, activation, "Defining exchange");
        let inbox = self.internal.clone();
        tokio::spawn(async move {
            let result = channel.define().await;
            let _ = inbox.send(Input::DefineCompleted { activation, result });
        });
    }

    fn drop_channel(&mut self) {
        if let Some(watcher) = self.release_watch.take() {
            watcher.abort();
        }
        self.channel = None;
    }

    /// Publish on the current channel, in-line so wire order is call order.
    async fn publish(&mut self, message: Message) -> ExchangeResult<()> {
        let Some(channel) = self.channel.clone() else {
            return Err(ExchangeError::PublishFailed {
                exchange: self.options.name.clone(),
                source: ChannelError::Closed,
            });
        };

        let tag = self.ledger.record(message.clone());
        match channel.publish(Envelope { tag, message }).await {
            Ok(()) => Ok(()),
            Err(source) => {
                // The caller sees the failure; the entry must not be replayed.
                self.ledger.confirm(tag);
                warn!(
                    exchange = %self.options.name,
                    tag = %tag,
                    error = %source,
                    "Publish rejected by channel"
                );
                Err(ExchangeError::PublishFailed {
                    exchange: self.options.name.clone(),
                    source,
                })
            }
        }
    }

    fn replay(&mut self, activation: u64) {
        let undelivered = self.ledger.reset();
        let inbox = self.internal.clone();
        let Some(channel) = self.channel.clone() else {
            // Nothing to send on; put the batch back for the next cycle.
            for message in undelivered {
                self.ledger.record(message);
            }
            let _ = inbox.send(Input::ReplayCompleted {
                activation,
                result: Err(ChannelError::Closed),
            });
            return;
        };

        info!(
            exchange = %self.options.name,
            count = undelivered.len(),
            activation,
            "Republishing undelivered messages"
        );
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            let result = republish(channel.as_ref(), &ledger, undelivered).await;
            let _ = inbox.send(Input::ReplayCompleted { activation, result });
        });
    }

    fn destroy_channel(&mut self, activation: u64) {
        let inbox = self.internal.clone();
        let Some(channel) = self.channel.clone() else {
            let _ = inbox.send(Input::TeardownCompleted {
                activation,
                result: Ok(()),
            });
            return;
        };

        tokio::spawn(async move {
            let result = channel.destroy().await;
            let _ = inbox.send(Input::TeardownCompleted { activation, result });
        });
    }
}

/// Send each undelivered message again, in order.
///
/// Every message is recorded afresh before it is sent. On the first failure
/// the rest of the batch is recorded unsent so a later cycle picks it up.
async fn republish(
    channel: &dyn TransportChannel,
    ledger: &PublishLedger<Message>,
    undelivered: Vec<Message>,
) -> Result<usize, ChannelError> {
    let total = undelivered.len();
    let mut remaining = undelivered.into_iter();
    while let Some(message) = remaining.next() {
        let tag = ledger.record(message.clone());
        if let Err(error) = channel.publish(Envelope { tag, message }).await {
            for message in remaining {
                ledger.record(message);
            }
            return Err(error);
        }
    }
    Ok(total)
}
