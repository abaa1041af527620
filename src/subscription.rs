//! The `SubscriptionHub`: delivers `optimistic` and `confirmed` state
//! snapshots to subscribers in the order applied (spec.md section 4.5).
//!
//! Each listener owns a dedicated [`tokio::sync::mpsc::UnboundedSender`]
//! drained by its own consumer task, so a slow listener can stall its own
//! delivery queue without reordering -- or even delaying -- events for any
//! other listener. This is a deliberate departure from the teacher's
//! `tokio::sync::broadcast` usage in `inmemory.rs`: a shared ring buffer
//! would let one slow receiver lag behind and silently drop messages,
//! which would violate the "no snapshot is ever skipped" ordering
//! guarantee (spec.md section 5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ModelError;
use crate::state::ModelState;

/// Identifies one subscription for a later [`SubscriptionHub::unsubscribe`]
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What is delivered to a listener on each call: a new state snapshot, or
/// a terminal error. Never both.
pub enum SubscriberEvent<S> {
    /// A new `(confirmed, optimistic)` snapshot, in application order.
    State(Arc<ModelState<S>>),
    /// A terminal error. Delivered at most once per listener, always last.
    Error(ModelError),
}

/// Caller-supplied callback invoked for every [`SubscriberEvent`] delivered
/// to this listener, serialised in application order.
pub type Listener<S> = Arc<dyn Fn(SubscriberEvent<S>) + Send + Sync>;

struct Subscriber<S> {
    tx: mpsc::UnboundedSender<SubscriberEvent<S>>,
    wants_optimistic: bool,
    task: JoinHandle<()>,
}

/// Delivers state snapshots and errors to subscribed listeners.
///
/// Two listener classes exist: `optimistic` listeners (the default) are
/// notified of every applied state change, confirmed or optimistic;
/// `confirmed`-only listeners are notified only when `confirmed` itself
/// changes (new confirmations, rejections, or a resync).
pub struct SubscriptionHub<S> {
    subscribers: Mutex<HashMap<u64, Subscriber<S>>>,
    next_id: AtomicU64,
}

impl<S> Default for SubscriptionHub<S>
where
    S: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SubscriptionHub<S>
where
    S: Send + Sync + 'static,
{
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a new listener. `wants_optimistic` selects the listener
    /// class: `true` (the default per spec.md section 6) delivers every
    /// applied state change; `false` delivers only changes to `confirmed`.
    pub fn subscribe(&self, listener: Listener<S>, wants_optimistic: bool) -> SubscriptionId {
        let (tx, mut rx) = mpsc::unbounded_channel::<SubscriberEvent<S>>();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listener(event);
            }
        });

        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.subscribers.lock().unwrap().insert(
            id,
            Subscriber {
                tx,
                wants_optimistic,
                task,
            },
        );

        SubscriptionId(id)
    }

    /// Removes a listener. Idempotent: unsubscribing an id that is not
    /// (or is no longer) registered is a no-op. The listener's consumer
    /// task drains whatever is already queued, then exits when the sender
    /// half is dropped.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(subscriber) = self.subscribers.lock().unwrap().remove(&id.0) {
            subscriber.task.abort();
        }
    }

    /// Number of currently registered listeners, for diagnostics and tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// True if no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes a state change that affected only `optimistic` (a fresh
    /// optimistic submission, or a rollback on timeout/cancel/rejection
    /// that leaves `confirmed` untouched). Delivered only to `optimistic`
    /// listeners.
    pub fn publish_optimistic(&self, state: Arc<ModelState<S>>) {
        self.dispatch(&state, false);
    }

    /// Publishes a state change that affected `confirmed` (a new
    /// confirmation, a rejection, or a resync snapshot replacement).
    /// Delivered to every listener.
    pub fn publish_confirmed(&self, state: Arc<ModelState<S>>) {
        self.dispatch(&state, true);
    }

    fn dispatch(&self, state: &Arc<ModelState<S>>, confirmed_changed: bool) {
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            if confirmed_changed || subscriber.wants_optimistic {
                let _ = subscriber
                    .tx
                    .send(SubscriberEvent::State(Arc::clone(state)));
            }
        }
    }

    /// Delivers a terminal error to every listener exactly once. Used when
    /// the owning Model moves to `errored` (merge failure, fatal broker
    /// state, or retry-strategy exhaustion).
    pub fn publish_error(&self, err: ModelError) {
        let subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            let _ = subscriber.tx.send(SubscriberEvent::Error(err.clone()));
        }
    }

    /// Delivers [`ModelError::Disposed`] to every listener, then releases
    /// all of them. Subsequent `subscribe` calls still work -- dispose
    /// only flushes existing listeners, per spec.md section 4.6 ("dispose
    /// ... flush subscribers").
    pub fn dispose(&self) {
        let mut subscribers = self.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            let _ = subscriber.tx.send(SubscriberEvent::Error(ModelError::Disposed));
        }
        for (_, subscriber) in subscribers.drain() {
            drop(subscriber.tx);
        }
    }
}
