//! Exchange lifecycle transition table.
//!
//! `Lifecycle` is pure: it consumes one `Input` at a time and returns the
//! `Effect`s the worker must carry out. It never touches a channel, the
//! ledger or a subscription itself, so every transition is testable without
//! a runtime.

use crate::{ChannelError, ExchangeError, ExchangeEvent, ExchangeResult, Message};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;

/// Completion token for a caller operation.
pub(crate) type Reply = oneshot::Sender<ExchangeResult<()>>;

/// Lifecycle state of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Setup,
    Initializing,
    Ready,
    Failed,
    Destroying,
    Destroyed,
    Reconnecting,
    Reconnected,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Setup => "setup",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Destroying => "destroying",
            LifecycleState::Destroyed => "destroyed",
            LifecycleState::Reconnecting => "reconnecting",
            LifecycleState::Reconnected => "reconnected",
        }
    }

    /// States that hold a live channel which may be revoked or replaced.
    fn holds_channel(&self) -> bool {
        matches!(
            self,
            LifecycleState::Initializing
                | LifecycleState::Ready
                | LifecycleState::Reconnecting
                | LifecycleState::Reconnected
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the lifecycle reacts to, from every source.
pub(crate) enum Input {
    /// Leave `setup`.
    Start,
    Check(Reply),
    Publish(Message, Reply),
    Destroy(Reply),
    /// Connection re-established its transport.
    ConnectionReconnected,
    /// Topology finished (re)declaring bindings.
    BindingsCompleted,
    /// The broker revoked the channel of `activation`.
    Released { activation: u64 },
    DefineCompleted {
        activation: u64,
        result: Result<(), ChannelError>,
    },
    TeardownCompleted {
        activation: u64,
        result: Result<(), ChannelError>,
    },
    ReplayCompleted {
        activation: u64,
        result: Result<usize, ChannelError>,
    },
}

impl Input {
    fn name(&self) -> &'static str {
        match self {
            Input::Start => "start",
            Input::Check(_) => "check",
            Input::Publish(..) => "publish",
            Input::Destroy(_) => "destroy",
            Input::ConnectionReconnected => "reconnected",
            Input::BindingsCompleted => "bindings-completed",
            Input::Released { .. } => "released",
            Input::DefineCompleted { .. } => "define-completed",
            Input::TeardownCompleted { .. } => "teardown-completed",
            Input::ReplayCompleted { .. } => "replay-completed",
        }
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Work the worker performs on behalf of the lifecycle.
pub(crate) enum Effect {
    /// Subscribe to connection and topology events, unless already subscribed.
    Listen,
    /// Drop every external subscription.
    Unlisten,
    /// Replace the channel with a fresh one and issue `define()`.
    OpenChannel { activation: u64 },
    /// Forget the current channel without tearing it down.
    DropChannel,
    /// Record `message` and publish it on the current channel.
    Publish { message: Message, reply: Reply },
    /// Drain the ledger and republish the undelivered set.
    Replay { activation: u64 },
    /// Issue `destroy()` on the current channel.
    DestroyChannel { activation: u64 },
    /// Warn if the ledger still holds unconfirmed entries.
    ReportUnconfirmed,
    ReportReplayFailure { error: ChannelError },
    Notify(ExchangeEvent),
    Reply {
        reply: Reply,
        result: ExchangeResult<()>,
    },
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Listen => f.write_str("Listen"),
            Effect::Unlisten => f.write_str("Unlisten"),
            Effect::OpenChannel { activation } => write!(f, "OpenChannel({})", activation),
            Effect::DropChannel => f.write_str("DropChannel"),
            Effect::Publish { message, .. } => write!(f, "Publish({})", message.message_id),
            Effect::Replay { activation } => write!(f, "Replay({})", activation),
            Effect::DestroyChannel { activation } => write!(f, "DestroyChannel({})", activation),
            Effect::ReportUnconfirmed => f.write_str("ReportUnconfirmed"),
            Effect::ReportReplayFailure { error } => write!(f, "ReportReplayFailure({})", error),
            Effect::Notify(event) => write!(f, "Notify({:?})", event),
            Effect::Reply { result, .. } => write!(f, "Reply({:?})", result),
        }
    }
}

/// Inputs parked until the lifecycle enters a given state.
#[derive(Debug, Default)]
pub(crate) struct DeferredQueue {
    entries: VecDeque<(LifecycleState, Input)>,
}

impl DeferredQueue {
    pub(crate) fn defer(&mut self, until: LifecycleState, input: Input) {
        self.entries.push_back((until, input));
    }

    /// Remove and return the inputs waiting for `state`, in arrival order.
    pub(crate) fn take_for(&mut self, state: LifecycleState) -> Vec<Input> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for (until, input) in self.entries.drain(..) {
            if until == state {
                taken.push(input);
            } else {
                kept.push_back((until, input));
            }
        }
        self.entries = kept;
        taken
    }

    /// Drop parked `bindings-completed` notifications.
    pub(crate) fn discard_bindings(&mut self) {
        self.entries
            .retain(|(_, input)| !matches!(input, Input::BindingsCompleted));
    }

    pub(crate) fn take_all(&mut self) -> Vec<Input> {
        self.entries.drain(..).map(|(_, input)| input).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The exchange lifecycle.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    exchange: String,
    state: LifecycleState,
    /// Bumped on every channel (re)creation.
    activation: u64,
    failure: Option<ExchangeError>,
    deferred: DeferredQueue,
    teardown: Option<Reply>,
    replaying: bool,
}

impl Lifecycle {
    pub(crate) fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            state: LifecycleState::Setup,
            activation: 0,
            failure: None,
            deferred: DeferredQueue::default(),
            teardown: None,
            replaying: false,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn activation(&self) -> u64 {
        self.activation
    }

    pub(crate) fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Feed one input and collect the resulting effects, in order.
    pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.dispatch(input, &mut effects);
        effects
    }

    fn dispatch(&mut self, input: Input, fx: &mut Vec<Effect>) {
        use LifecycleState::*;

        match input {
            Input::Start => {
                if self.state == Setup {
                    fx.push(Effect::Listen);
                    self.transition(Initializing, fx);
                }
            }

            Input::Check(reply) => match self.state {
                Ready => reply_ok(reply, fx),
                Failed => self.reply_failure(reply, fx),
                Destroyed if self.failure.is_some() => self.reply_failure(reply, fx),
                Destroying => self.deferred.defer(Destroyed, Input::Check(reply)),
                _ => self.deferred.defer(Ready, Input::Check(reply)),
            },

            Input::Publish(message, reply) => match self.state {
                Ready => fx.push(Effect::Publish { message, reply }),
                Failed => self.reply_failure(reply, fx),
                // Destroyed after a failure: the instance stays unusable.
                Destroyed if self.failure.is_some() => self.reply_failure(reply, fx),
                Destroying => self
                    .deferred
                    .defer(Destroyed, Input::Publish(message, reply)),
                Destroyed => {
                    self.transition(Reconnecting, fx);
                    self.deferred.defer(Ready, Input::Publish(message, reply));
                }
                _ => self.deferred.defer(Ready, Input::Publish(message, reply)),
            },

            Input::Destroy(reply) => match self.state {
                Initializing | Ready | Reconnecting | Reconnected => {
                    self.teardown = Some(reply);
                    self.transition(Destroying, fx);
                    fx.push(Effect::DestroyChannel {
                        activation: self.activation,
                    });
                }
                Destroying => self.deferred.defer(Destroyed, Input::Destroy(reply)),
                Failed => {
                    self.transition(Destroyed, fx);
                    reply_ok(reply, fx);
                }
                Setup | Destroyed => reply_ok(reply, fx),
            },

            Input::ConnectionReconnected => {
                if self.state.holds_channel() {
                    self.transition(Reconnecting, fx);
                }
            }

            Input::BindingsCompleted => match self.state {
                Destroyed if self.failure.is_some() => {}
                Destroyed | Reconnecting => {
                    self.deferred.defer(Reconnected, Input::BindingsCompleted)
                }
                Reconnected if !self.replaying => {
                    self.replaying = true;
                    fx.push(Effect::Replay {
                        activation: self.activation,
                    });
                }
                _ => {}
            },

            Input::Released { activation } => {
                if activation == self.activation && self.state.holds_channel() {
                    self.transition(Initializing, fx);
                }
            }

            Input::DefineCompleted { activation, result } => {
                if activation != self.activation {
                    return;
                }
                let next = match self.state {
                    Initializing => Ready,
                    Reconnecting => Reconnected,
                    _ => return,
                };
                match result {
                    Ok(()) => self.transition(next, fx),
                    Err(source) => {
                        self.failure = Some(ExchangeError::DefinitionFailed {
                            exchange: self.exchange.clone(),
                            source,
                        });
                        self.transition(Failed, fx);
                    }
                }
            }

            Input::TeardownCompleted { activation, result } => {
                if activation != self.activation || self.state != Destroying {
                    return;
                }
                let reply = self.teardown.take();
                match result {
                    Ok(()) => {
                        self.transition(Destroyed, fx);
                        if let Some(reply) = reply {
                            reply_ok(reply, fx);
                        }
                    }
                    Err(source) => {
                        let error = ExchangeError::TeardownFailed {
                            exchange: self.exchange.clone(),
                            source,
                        };
                        self.failure = Some(error.clone());
                        self.transition(Failed, fx);
                        if let Some(reply) = reply {
                            fx.push(Effect::Reply {
                                reply,
                                result: Err(error),
                            });
                        }
                    }
                }
            }

            Input::ReplayCompleted { activation, result } => {
                if activation != self.activation {
                    return;
                }
                self.replaying = false;
                if self.state != Reconnected {
                    return;
                }
                match result {
                    Ok(_) => self.transition(Ready, fx),
                    Err(error) => fx.push(Effect::ReportReplayFailure { error }),
                }
            }
        }
    }

    fn transition(&mut self, to: LifecycleState, fx: &mut Vec<Effect>) {
        let from = self.state;
        self.state = to;
        fx.push(Effect::Notify(ExchangeEvent::StateChanged { from, to }));
        self.enter(to, fx);

        // Entry actions may have moved on already; deferred inputs for `to`
        // then keep waiting for the next time it is entered.
        if self.state == to {
            for input in self.deferred.take_for(to) {
                self.dispatch(input, fx);
            }
        }
    }

    fn enter(&mut self, state: LifecycleState, fx: &mut Vec<Effect>) {
        use LifecycleState::*;

        match state {
            Setup | Destroying => {}
            Initializing => {
                self.replaying = false;
                // Bindings of an abandoned reconnect say nothing about the next one.
                self.deferred.discard_bindings();
                self.activation += 1;
                fx.push(Effect::OpenChannel {
                    activation: self.activation,
                });
            }
            Ready => {
                self.deferred.discard_bindings();
                fx.push(Effect::Notify(ExchangeEvent::Defined));
            }
            Reconnected => fx.push(Effect::Notify(ExchangeEvent::Defined)),
            Failed => {
                self.replaying = false;
                fx.push(Effect::DropChannel);
                fx.push(Effect::Unlisten);
                let error = self.failure_cause();
                fx.push(Effect::Notify(ExchangeEvent::Failed(error.clone())));
                for input in self.deferred.take_all() {
                    match input {
                        Input::Check(reply) | Input::Publish(_, reply) | Input::Destroy(reply) => {
                            fx.push(Effect::Reply {
                                reply,
                                result: Err(error.clone()),
                            })
                        }
                        _ => {}
                    }
                }
            }
            Destroyed => {
                self.replaying = false;
                fx.push(Effect::ReportUnconfirmed);
                fx.push(Effect::Unlisten);
                fx.push(Effect::DropChannel);
            }
            Reconnecting => {
                self.replaying = false;
                fx.push(Effect::Listen);
                self.activation += 1;
                fx.push(Effect::OpenChannel {
                    activation: self.activation,
                });
            }
        }
    }

    fn failure_cause(&self) -> ExchangeError {
        self.failure
            .clone()
            .unwrap_or_else(|| ExchangeError::DefinitionFailed {
                exchange: self.exchange.clone(),
                source: ChannelError::Closed,
            })
    }

    fn reply_failure(&self, reply: Reply, fx: &mut Vec<Effect>) {
        fx.push(Effect::Reply {
            reply,
            result: Err(self.failure_cause()),
        });
    }
}

fn reply_ok(reply: Reply, fx: &mut Vec<Effect>) {
    fx.push(Effect::Reply { reply, result: Ok(()) });
}
