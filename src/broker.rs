//! The broker channel contract: consumed, not implemented, by this crate.
//!
//! This is the sole collaborator described only by interface (spec.md
//! section 1): an ordered, at-least-once realtime channel SDK with
//! history replay and connection-state events. Production code plugs in
//! a real broker adapter; tests use [`crate::broker::mock`].

use futures::stream::BoxStream;
use serde_json::Value;

use crate::sequence::SequenceId;

/// Observable states of a [`BrokerChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// The channel is not attached.
    Initialized,
    /// Attach is in progress.
    Attaching,
    /// The channel is attached and receiving messages.
    Attached,
    /// The channel lost its attachment and may resume without a
    /// resumed-history guarantee.
    Suspended,
    /// Detach is in progress.
    Detaching,
    /// The channel is cleanly detached.
    Detached,
    /// The channel failed fatally (e.g. permission denied).
    Failed,
}

/// A single raw message delivered by the broker, prior to being parsed
/// into a [`crate::event::ConfirmedEvent`] by [`crate::stream::Stream`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Broker-assigned message id.
    pub uuid: String,
    /// Event name.
    pub name: String,
    /// Event payload.
    pub data: Value,
    /// The originating `mutationId`, carried in message headers/extras
    /// when the server supports echo.
    pub mutation_id: Option<String>,
    /// The sequence token attached to this message.
    pub sequence_id: SequenceId,
    /// True if this message is a rejection rather than an application.
    pub rejected: bool,
    /// Server-supplied rejection reason, present only when `rejected`.
    pub reject_reason: Option<String>,
}

/// Extra headers attached to a publish call (e.g. the originating
/// `mutationId`, for servers that support confirmation echo).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishExtras {
    /// The `mutationId` to echo back on confirmation, if any.
    pub mutation_id: Option<String>,
}

/// A bounded, paginated history query, issued by [`crate::stream::Stream`]
/// on resume.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    /// Maximum number of messages per page (`historyPageSize`).
    pub limit: usize,
    /// Only return messages with a strictly greater sequence id than this,
    /// when present.
    pub after: Option<String>,
}

/// One page of a history query.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    /// Messages in this page, in delivery order.
    pub items: Vec<RawMessage>,
    /// True if more pages remain.
    pub has_next: bool,
}

/// Error raised by a [`BrokerChannel`] operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BrokerError(pub String);

/// The broker channel contract consumed by [`crate::stream::Stream`].
///
/// Implementations provide ordered, at-least-once delivery over one named
/// channel, plus bounded history pagination and connection-state
/// notifications.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Attaches to the channel, beginning live delivery.
    async fn attach(&self) -> Result<(), BrokerError>;

    /// Detaches from the channel; no further messages are delivered until
    /// [`BrokerChannel::attach`] is called again.
    async fn detach(&self) -> Result<(), BrokerError>;

    /// Subscribes to live messages delivered while attached.
    fn subscribe(&self) -> BoxStream<'static, RawMessage>;

    /// Publishes a new event, used for submitting mutations to the
    /// backend through the same channel (out of scope for this crate's
    /// reconciliation engine, but part of the contract).
    async fn publish(
        &self,
        name: &str,
        data: Value,
        extras: PublishExtras,
    ) -> Result<(), BrokerError>;

    /// A bounded, paginated history query.
    async fn history(&self, query: HistoryQuery) -> Result<HistoryPage, BrokerError>;

    /// Resolves once the channel reaches the given state.
    async fn when_state(&self, state: ChannelState) -> Result<(), BrokerError>;

    /// A stream of channel state transitions.
    fn on_state(&self) -> BoxStream<'static, ChannelState>;
}

/// In-memory [`BrokerChannel`] test double, used by the crate's own test
/// suite and available to downstream users for their own integration
/// tests.
pub mod mock {
    use std::sync::{Arc, Mutex};

    use futures::stream::{BoxStream, StreamExt};
    use tokio::sync::broadcast;

    use super::{BrokerChannel, BrokerError, ChannelState, HistoryPage, HistoryQuery, RawMessage};

    /// A minimal, synchronous, in-process broker used by tests: messages
    /// fed in via [`MockBrokerChannel::push`] are replayed to subscribers
    /// and retained for history queries.
    #[derive(Clone)]
    pub struct MockBrokerChannel {
        inner: Arc<Mutex<Inner>>,
        tx: broadcast::Sender<RawMessage>,
        state_tx: broadcast::Sender<ChannelState>,
    }

    struct Inner {
        history: Vec<RawMessage>,
        state: ChannelState,
        failed: bool,
    }

    impl Default for MockBrokerChannel {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockBrokerChannel {
        /// Creates a new, detached mock channel.
        #[must_use]
        pub fn new() -> Self {
            let (tx, _rx) = broadcast::channel(1024);
            let (state_tx, _state_rx) = broadcast::channel(16);
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    history: Vec::new(),
                    state: ChannelState::Initialized,
                    failed: false,
                })),
                tx,
                state_tx,
            }
        }

        /// Appends a message to history and, if attached, delivers it live.
        pub fn push(&self, message: RawMessage) {
            self.inner.lock().unwrap().history.push(message.clone());
            let _ = self.tx.send(message);
        }

        /// Forces the channel into `Suspended`, simulating a transient
        /// disconnection.
        pub fn suspend(&self) {
            self.set_state(ChannelState::Suspended);
        }

        /// Forces the channel into `Failed`, simulating a fatal error.
        pub fn fail(&self) {
            self.inner.lock().unwrap().failed = true;
            self.set_state(ChannelState::Failed);
        }

        fn set_state(&self, state: ChannelState) {
            self.inner.lock().unwrap().state = state;
            let _ = self.state_tx.send(state);
        }
    }

    #[async_trait::async_trait]
    impl BrokerChannel for MockBrokerChannel {
        async fn attach(&self) -> Result<(), BrokerError> {
            if self.inner.lock().unwrap().failed {
                return Err(BrokerError("channel failed".into()));
            }
            self.set_state(ChannelState::Attached);
            Ok(())
        }

        async fn detach(&self) -> Result<(), BrokerError> {
            self.set_state(ChannelState::Detached);
            Ok(())
        }

        fn subscribe(&self) -> BoxStream<'static, RawMessage> {
            let rx = self.tx.subscribe();
            tokio_stream::wrappers::BroadcastStream::new(rx)
                .filter_map(|result| async move { result.ok() })
                .boxed()
        }

        async fn publish(
            &self,
            _name: &str,
            _data: serde_json::Value,
            _extras: super::PublishExtras,
        ) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn history(&self, query: HistoryQuery) -> Result<HistoryPage, BrokerError> {
            let inner = self.inner.lock().unwrap();
            let items: Vec<RawMessage> = inner
                .history
                .iter()
                .filter(|m| match &query.after {
                    Some(after) => {
                        crate::sequence::compare_default(m.sequence_id.as_str(), after)
                            == std::cmp::Ordering::Greater
                    }
                    None => true,
                })
                .take(query.limit)
                .cloned()
                .collect();

            Ok(HistoryPage {
                has_next: false,
                items,
            })
        }

        async fn when_state(&self, state: ChannelState) -> Result<(), BrokerError> {
            if self.inner.lock().unwrap().state == state {
                return Ok(());
            }

            let mut rx = self.state_tx.subscribe();
            while let Ok(next) = rx.recv().await {
                if next == state {
                    return Ok(());
                }
            }
            Err(BrokerError("state stream closed".into()))
        }

        fn on_state(&self) -> BoxStream<'static, ChannelState> {
            let rx = self.state_tx.subscribe();
            tokio_stream::wrappers::BroadcastStream::new(rx)
                .filter_map(|result| async move { result.ok() })
                .boxed()
        }
    }
}
