//! The `Model` controller: owns the lifecycle state machine and sequences
//! every other collaborator (spec.md section 4.6).
//!
//! All mutation of a Model's state happens behind one
//! [`tokio::sync::Mutex`], so that -- as the teacher's `EventStore`/
//! `Subscription` traits return boxed futures/streams precisely so
//! callers control when suspension happens -- this crate never holds the
//! lock across an `.await`: it acquires it for a synchronous state
//! transition, drops it, then awaits the suspension points named in
//! spec.md section 5 (snapshot call, history pagination, buffer window,
//! subscriber delivery).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::broker::BrokerChannel;
use crate::config::ModelOptions;
use crate::error::ModelError;
use crate::event::OptimisticEvent;
use crate::merge::MergeEngine;
use crate::optimistic::{OptimisticLayer, OptimisticParams};
use crate::state::ModelState;
use crate::stream::{Stream, StreamConfig, StreamItem};
use crate::subscription::{Listener, SubscriptionHub, SubscriptionId};
use crate::sync::SyncEngine;

/// Lifecycle states of a [`Model`] (spec.md section 3/4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, `sync()` not yet called.
    Initialized,
    /// `sync()` called; the initial snapshot is being fetched.
    Preparing,
    /// Snapshot fetched (or a resync triggered); the Stream is attaching
    /// and replaying history.
    Syncing,
    /// Steady state: live confirmations are being applied.
    Ready,
    /// The Stream has been explicitly paused by the caller.
    Paused,
    /// `dispose()` has completed; the Model is inert.
    Disposed,
    /// A merge failure or fatal broker error occurred; terminal.
    Errored,
}

/// The future returned for the confirmation of an [`Model::optimistic`]
/// submission.
pub type ConfirmationFuture = Pin<Box<dyn Future<Output = Result<(), ModelError>> + Send>>;

/// Returned by [`Model::optimistic`]: a future resolving once every event
/// in the batch is confirmed, plus an explicit cancel handle.
pub struct OptimisticSubmission {
    /// Resolves to `Ok(())` once every event in the batch is confirmed, or
    /// `Err` on rejection, timeout, cancellation, or Model disposal.
    pub confirmed: ConfirmationFuture,
    cancel: Box<dyn FnOnce() + Send>,
}

impl OptimisticSubmission {
    /// Cancels this batch immediately, equivalent to a timeout firing with
    /// reason [`ModelError::Cancelled`].
    pub fn cancel(self) {
        (self.cancel)();
    }
}

struct Inner<S> {
    options: ModelOptions<S>,
    broker: Arc<dyn BrokerChannel>,
    merge: MergeEngine<S>,
    sync_engine: SyncEngine<S>,
    stream: Stream,
    /// `None` until the first successful snapshot.
    layer: Option<OptimisticLayer<S>>,
}

/// Caller-driven pause control, observed by the background driver task
/// alongside incoming stream items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    Pause,
}

struct Shared<S> {
    name: String,
    inner: AsyncMutex<Inner<S>>,
    hub: SubscriptionHub<S>,
    lifecycle_tx: watch::Sender<LifecycleState>,
    lifecycle_rx: watch::Receiver<LifecycleState>,
    disposed: AtomicBool,
    starting: AsyncMutex<()>,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
    control_tx: watch::Sender<ControlSignal>,
    control_rx: watch::Receiver<ControlSignal>,
    /// One timeout-timer task per outstanding `PendingConfirmation`, keyed
    /// by its batch id. Removed and aborted as soon as the batch settles
    /// by any route (confirmation, rejection, cancel, or dispose) so a
    /// settled batch never holds a cloned `Arc<Shared<S>>` alive for the
    /// rest of its timeout window (spec.md section 5: "timers are cleared
    /// on completion and on dispose to avoid leaks").
    timers: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<S> Shared<S> {
    fn set_lifecycle(&self, state: LifecycleState) {
        let _ = self.lifecycle_tx.send(state);
    }

    fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle_rx.borrow()
    }
}

/// A named, server-authoritative materialised entity held in memory.
///
/// Cheaply cloneable: every clone shares the same underlying state via
/// `Arc`.
pub struct Model<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Model<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> Model<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Constructs a new `Model`, validating `options` synchronously.
    /// Nothing asynchronous happens until [`Model::sync`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidArgument`] if `options` fails
    /// [`ModelOptions::validate`].
    pub fn new(
        name: impl Into<String>,
        broker: Arc<dyn BrokerChannel>,
        options: ModelOptions<S>,
    ) -> Result<Self, ModelError> {
        options.validate()?;

        let merge = MergeEngine::new(Arc::clone(&options.merge));
        let sync_engine = SyncEngine::new(
            Arc::clone(&options.sync),
            Arc::clone(&options.sync_options.retry_strategy),
        );

        let inner = Inner {
            stream: Stream::new(
                Arc::clone(&broker),
                StreamConfig {
                    buffer_ms: options.event_buffer_options.buffer_ms,
                    event_orderer: Arc::clone(&options.event_buffer_options.event_orderer),
                    history_page_size: options.sync_options.history_page_size,
                    retry_strategy: Arc::clone(&options.sync_options.retry_strategy),
                },
            ),
            options,
            broker,
            merge,
            sync_engine,
            layer: None,
        };

        let (lifecycle_tx, lifecycle_rx) = watch::channel(LifecycleState::Initialized);
        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                inner: AsyncMutex::new(inner),
                hub: SubscriptionHub::new(),
                lifecycle_tx,
                lifecycle_rx,
                disposed: AtomicBool::new(false),
                starting: AsyncMutex::new(()),
                driver: std::sync::Mutex::new(None),
                control_tx,
                control_rx,
                timers: std::sync::Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The model's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle()
    }

    /// Fetches the initial snapshot and attaches the Stream if this is the
    /// first call; idempotent on subsequent calls. Returns the current
    /// `confirmed` projection once the Model reaches `ready` (or
    /// immediately, if it is already `errored`/`disposed`).
    ///
    /// # Errors
    ///
    /// Returns the error that moved the Model to `errored`, if any.
    pub async fn sync(&self) -> Result<Arc<ModelState<S>>, ModelError> {
        if self.shared.lifecycle() == LifecycleState::Initialized {
            self.start().await?;
        } else if matches!(
            self.shared.lifecycle(),
            LifecycleState::Preparing | LifecycleState::Syncing
        ) {
            self.when_state(LifecycleState::Ready).await;
        }

        self.state()
            .await
            .ok_or_else(|| ModelError::InvalidArgument("model has no snapshot yet".to_owned()))
    }

    async fn start(&self) -> Result<(), ModelError> {
        let _guard = self.shared.starting.lock().await;
        if self.shared.lifecycle() != LifecycleState::Initialized {
            return Ok(());
        }

        self.shared.set_lifecycle(LifecycleState::Preparing);

        let snapshot = {
            let inner = self.shared.inner.lock().await;
            inner.sync_engine.snapshot().await
        };

        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.shared.set_lifecycle(LifecycleState::Errored);
                let err = ModelError::SyncExhausted(err);

                #[cfg(feature = "tracing")]
                tracing::error!(model = %self.shared.name, error = %err, "initial sync exhausted retry strategy");

                self.shared.hub.publish_error(err.clone());
                return Err(err);
            }
        };

        self.shared.set_lifecycle(LifecycleState::Syncing);

        let sequence_id = snapshot.sequence_id.clone();

        let stream_handle = {
            let mut inner = self.shared.inner.lock().await;
            let timeout = inner.options.optimistic_event_options.timeout;
            let merge = inner.merge.clone();
            inner.layer = Some(OptimisticLayer::new(
                ModelState::from(snapshot),
                merge,
                timeout,
            ));
            inner.stream.clone()
        };

        // Attach, subscribe, and replay history before this Model is
        // considered `ready` -- and before control returns to the caller
        // of `sync()` -- so that any connection-state transition the
        // caller triggers afterwards is observed by the live subscription
        // rather than raced against it (spec.md section 4.6: "ready"
        // follows "Stream attached & history replayed").
        let live = stream_handle.resume(sequence_id.clone()).await;

        self.shared.set_lifecycle(LifecycleState::Ready);

        let driver = tokio::spawn(run_driver(
            Arc::clone(&self.shared),
            live,
            sequence_id,
            self.shared.control_rx.clone(),
        ));
        *self.shared.driver.lock().unwrap() = Some(driver);

        Ok(())
    }

    /// Returns the current `(confirmed, optimistic)` snapshot, or `None`
    /// before the first snapshot has been fetched.
    pub async fn state(&self) -> Option<Arc<ModelState<S>>> {
        let inner = self.shared.inner.lock().await;
        inner.layer.as_ref().map(|layer| Arc::new(layer.state().clone()))
    }

    /// Submits a batch of optimistic events (spec.md section 4.4).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidArgument`] if `events` is empty, any
    /// event lacks a `mutationId`, or the Model has not yet synced;
    /// returns [`ModelError::Disposed`] if the Model has been disposed.
    pub async fn optimistic(
        &self,
        events: Vec<OptimisticEvent>,
        params: OptimisticParams,
    ) -> Result<OptimisticSubmission, ModelError> {
        if self.shared.disposed.load(AtomicOrdering::SeqCst) {
            return Err(ModelError::Disposed);
        }

        let (state, handle) = {
            let mut inner = self.shared.inner.lock().await;
            let layer = inner.layer.as_mut().ok_or_else(|| {
                ModelError::InvalidArgument("optimistic() called before sync()".to_owned())
            })?;
            layer.submit(events, params)?
        };

        self.shared.hub.publish_optimistic(Arc::new(state));

        let timeout_shared = Arc::clone(&self.shared);
        let timeout_id = handle.id.clone();
        let timeout = handle.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            settle(&timeout_shared, &timeout_id, SettleKind::Timeout).await;
        });
        self.shared
            .timers
            .lock()
            .unwrap()
            .insert(handle.id.clone(), timer);

        let cancel_shared = Arc::clone(&self.shared);
        let cancel_id = handle.id.clone();
        let cancel: Box<dyn FnOnce() + Send> = Box::new(move || {
            tokio::spawn(async move {
                settle(&cancel_shared, &cancel_id, SettleKind::Cancel).await;
            });
        });

        let confirmed = handle.confirmed;
        Ok(OptimisticSubmission {
            confirmed: Box::pin(async move { confirmed.await.unwrap_or(Err(ModelError::Cancelled)) }),
            cancel,
        })
    }

    /// Registers a listener. `wants_optimistic` (default `true` per
    /// spec.md section 6) selects whether every applied state change is
    /// delivered, or only changes to `confirmed`.
    pub fn subscribe(&self, listener: Listener<S>, wants_optimistic: bool) -> SubscriptionId {
        self.shared.hub.subscribe(listener, wants_optimistic)
    }

    /// Removes a previously registered listener. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.hub.unsubscribe(id);
    }

    /// Invokes `cb` every time the Model's lifecycle reaches `target`,
    /// including immediately if it already has.
    pub fn on(&self, target: LifecycleState, cb: impl Fn(LifecycleState) + Send + 'static) {
        let mut rx = self.shared.lifecycle_rx.clone();
        tokio::spawn(async move {
            if *rx.borrow() == target {
                cb(target);
            }
            while rx.changed().await.is_ok() {
                let state = *rx.borrow();
                if state == target {
                    cb(target);
                }
            }
        });
    }

    /// Resolves once the Model's lifecycle reaches `target`, resolving
    /// immediately if it already has.
    pub async fn when_state(&self, target: LifecycleState) -> LifecycleState {
        let mut rx = self.shared.lifecycle_rx.clone();
        loop {
            let current = *rx.borrow();
            if current == target {
                return current;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Pauses the Stream: detaches the underlying channel so no further
    /// confirmations are applied until [`Model::resume`] is called.
    /// Idempotent; a no-op outside `ready` (spec.md section 3's
    /// `ready ⇄ paused` lifecycle cycle).
    pub fn pause(&self) {
        let _ = self.shared.control_tx.send(ControlSignal::Pause);
    }

    /// Resumes a paused Stream: reattaches the channel and replays history
    /// from the Model's current `sequenceId`, the same handshake performed
    /// on initial sync and after a resync. Idempotent; a no-op outside
    /// `paused`.
    pub fn resume(&self) {
        let _ = self.shared.control_tx.send(ControlSignal::Run);
    }

    /// Disposes the Model: detaches the channel, rejects every outstanding
    /// optimistic confirmation, flushes subscribers with a terminal
    /// error, and stops the background driver task. Idempotent; safe to
    /// call from any lifecycle state.
    pub async fn dispose(&self) {
        if self
            .shared
            .disposed
            .swap(true, AtomicOrdering::SeqCst)
        {
            return;
        }

        {
            let mut inner = self.shared.inner.lock().await;
            if let Some(layer) = inner.layer.as_mut() {
                layer.dispose();
            }
            let _ = inner.stream.pause().await;
        }

        for (_, handle) in self.shared.timers.lock().unwrap().drain() {
            handle.abort();
        }

        self.shared.hub.dispose();
        self.shared.set_lifecycle(LifecycleState::Disposed);

        if let Some(handle) = self.shared.driver.lock().unwrap().take() {
            handle.abort();
        }
    }
}

enum SettleKind {
    Timeout,
    Cancel,
}

async fn settle<S>(shared: &Arc<Shared<S>>, id: &str, kind: SettleKind)
where
    S: Clone + Send + Sync + 'static,
{
    let settled = {
        let mut inner = shared.inner.lock().await;
        inner.layer.as_mut().and_then(|layer| match kind {
            SettleKind::Timeout => layer.timeout(id),
            SettleKind::Cancel => layer.cancel(id),
        })
    };

    if let Some(handle) = shared.timers.lock().unwrap().remove(id) {
        handle.abort();
    }

    if let Some(state) = settled {
        shared.hub.publish_optimistic(Arc::new(state));
    }
}

/// Drives one Model's Stream for its whole lifetime: applies confirmed
/// events in delivery order, and invokes the resync protocol (spec.md
/// section 4.2) on discontinuity.
///
/// `stream` is the already-attached, already-subscribed live stream
/// returned by the initial [`Stream::resume`] call in
/// [`Model::start`] -- that eager handshake is what lets a caller's
/// post-`sync()` actions (like forcing a connection-state change in a
/// test) be observed rather than raced. Every subsequent resync rebuilds
/// the stream the same way, awaited from within this task instead.
async fn run_driver<S>(
    shared: Arc<Shared<S>>,
    mut stream: BoxStream<'static, StreamItem>,
    mut from: crate::sequence::SequenceId,
    mut control_rx: watch::Receiver<ControlSignal>,
) where
    S: Clone + Send + Sync + 'static,
{
    'outer: loop {
        if shared.disposed.load(AtomicOrdering::SeqCst) {
            return;
        }

        let item = tokio::select! {
            biased;

            changed = control_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                if *control_rx.borrow() == ControlSignal::Pause {
                    if pause_and_await_resume(&shared, &mut control_rx).await.is_none() {
                        return;
                    }

                    let stream_handle = {
                        let inner = shared.inner.lock().await;
                        inner.stream.clone()
                    };
                    stream = stream_handle.resume(from.clone()).await;
                    shared.set_lifecycle(LifecycleState::Ready);
                }
                continue 'outer;
            }

            item = stream.next() => item,
        };

        if shared.disposed.load(AtomicOrdering::SeqCst) {
            return;
        }

        match item {
            None => return,
            Some(item) => match item {
                StreamItem::Event(event) => {
                    let outcome = {
                        let mut inner = shared.inner.lock().await;
                        inner.layer.as_mut().map(|layer| layer.on_confirmed(event))
                    };

                    match outcome {
                        Some(Ok(outcome)) => {
                            let inner = shared.inner.lock().await;
                            if let Some(layer) = inner.layer.as_ref() {
                                from = layer.state().sequence_id.clone();
                            }
                            drop(inner);

                            if !outcome.settled.is_empty() {
                                let mut timers = shared.timers.lock().unwrap();
                                for id in &outcome.settled {
                                    if let Some(handle) = timers.remove(id) {
                                        handle.abort();
                                    }
                                }
                            }

                            if let Some(state) = outcome.state {
                                shared.hub.publish_confirmed(Arc::new(state));
                            }
                        }
                        Some(Err(err)) => {
                            shared.set_lifecycle(LifecycleState::Errored);

                            #[cfg(feature = "tracing")]
                            tracing::error!(model = %shared.name, error = %err, "merge function failed, model entering errored state");

                            shared.hub.publish_error(err);
                            return;
                        }
                        None => return,
                    }
                }

                StreamItem::Discontinuity(reason) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(model = %shared.name, from = %from, reason = %reason, "resync starting");

                    match resync(&shared, reason.to_string()).await {
                        Some(new_from) => {
                            from = new_from;

                            let stream_handle = {
                                let inner = shared.inner.lock().await;
                                inner.stream.clone()
                            };
                            stream = stream_handle.resume(from.clone()).await;
                            shared.set_lifecycle(LifecycleState::Ready);

                            continue 'outer;
                        }
                        None => return,
                    }
                }

                StreamItem::Failed(message) => {
                    shared.set_lifecycle(LifecycleState::Errored);

                    #[cfg(feature = "tracing")]
                    tracing::error!(model = %shared.name, error = %message, "broker channel reported a fatal error");

                    shared
                        .hub
                        .publish_error(ModelError::StreamFatal(message));
                    return;
                }
            },
        }
    }
}

/// Pauses the Stream and blocks until a `Run` signal is observed.
///
/// Returns `Some(())` once resumed, or `None` if the Model was disposed
/// while paused (in which case the caller should exit rather than
/// attempt to resume the Stream).
async fn pause_and_await_resume<S>(
    shared: &Arc<Shared<S>>,
    control_rx: &mut watch::Receiver<ControlSignal>,
) -> Option<()>
where
    S: Clone + Send + Sync + 'static,
{
    let stream_handle = {
        let inner = shared.inner.lock().await;
        inner.stream.clone()
    };
    let _ = stream_handle.pause().await;
    shared.set_lifecycle(LifecycleState::Paused);

    #[cfg(feature = "tracing")]
    tracing::debug!(model = %shared.name, "stream paused");

    loop {
        if shared.disposed.load(AtomicOrdering::SeqCst) {
            return None;
        }
        if control_rx.changed().await.is_err() {
            return None;
        }
        if *control_rx.borrow() == ControlSignal::Run {
            #[cfg(feature = "tracing")]
            tracing::debug!(model = %shared.name, "stream resuming");

            return Some(());
        }
    }
}

/// The resync protocol (spec.md section 4.2): pause, re-snapshot, discard
/// outstanding optimistic events, replace both projections, resume.
/// Returns the new `sequenceId` to resume the Stream from, or `None` if
/// the snapshot's retry strategy was exhausted (terminal).
async fn resync<S>(shared: &Arc<Shared<S>>, reason: String) -> Option<crate::sequence::SequenceId>
where
    S: Clone + Send + Sync + 'static,
{
    shared.set_lifecycle(LifecycleState::Syncing);

    {
        let inner = shared.inner.lock().await;
        let _ = inner.stream.pause().await;
    }

    // `discard_all` below settles every outstanding batch at once, so every
    // tracked timeout timer is now stale regardless of which id it belongs
    // to.
    for (_, handle) in shared.timers.lock().unwrap().drain() {
        handle.abort();
    }

    let snapshot = {
        let inner = shared.inner.lock().await;
        inner.sync_engine.snapshot().await
    };

    match snapshot {
        Ok(snapshot) => {
            let sequence_id = snapshot.sequence_id.clone();
            let state = {
                let mut inner = shared.inner.lock().await;
                let layer = inner.layer.as_mut()?;
                layer.discard_all(reason);
                layer.replace_state(ModelState::from(snapshot));
                layer.state().clone()
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(model = %shared.name, to = %sequence_id, "resync complete");

            shared.hub.publish_confirmed(Arc::new(state));
            Some(sequence_id)
        }
        Err(err) => {
            shared.set_lifecycle(LifecycleState::Errored);

            #[cfg(feature = "tracing")]
            tracing::error!(model = %shared.name, error = %err, "resync snapshot exhausted retry strategy");

            shared
                .hub
                .publish_error(ModelError::SyncExhausted(err));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBrokerChannel;
    use crate::broker::RawMessage;
    use crate::config::{EventBufferOptions, OptimisticEventOptions, Snapshot, SyncOptions};
    use crate::event::Event;
    use crate::sequence::SequenceId;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Comments(Vec<String>);

    fn options(
        broker: &MockBrokerChannel,
    ) -> (Arc<dyn BrokerChannel>, ModelOptions<Comments>) {
        let broker: Arc<dyn BrokerChannel> = Arc::new(broker.clone());
        let options = ModelOptions {
            channel_name: "room".into(),
            sync: Arc::new(|| {
                Box::pin(async {
                    Ok(Snapshot {
                        data: Comments(vec![]),
                        sequence_id: SequenceId::new("0"),
                    })
                })
            }),
            merge: Arc::new(|state: &Comments, event: &Event| {
                if event.name() != "addComment" {
                    return Ok(state.clone());
                }
                let id = event.data()["id"].as_str().unwrap_or_default().to_owned();
                let mut next = state.0.clone();
                if !event.is_confirmed() || !next.contains(&id) {
                    next.push(id);
                }
                Ok(Comments(next))
            }),
            optimistic_event_options: OptimisticEventOptions {
                timeout: Duration::from_millis(200),
            },
            sync_options: SyncOptions::default(),
            event_buffer_options: EventBufferOptions::default(),
        };
        (broker, options)
    }

    #[tokio::test]
    async fn happy_path_round_trip() {
        let mock = MockBrokerChannel::new();
        let (broker, opts) = options(&mock);
        let model = Model::new("comments", broker, opts).unwrap();

        model.sync().await.unwrap();

        let submission = model
            .optimistic(
                vec![OptimisticEvent {
                    uuid: String::new(),
                    mutation_id: "m1".into(),
                    name: "addComment".into(),
                    data: json!({"id": "c1"}),
                }],
                OptimisticParams::default(),
            )
            .await
            .unwrap();

        let state = model.state().await.unwrap();
        assert_eq!(state.optimistic, Comments(vec!["c1".to_owned()]));

        mock.push(RawMessage {
            uuid: "msg-1".into(),
            name: "addComment".into(),
            data: json!({"id": "c1"}),
            mutation_id: Some("m1".into()),
            sequence_id: SequenceId::new("1"),
            rejected: false,
            reject_reason: None,
        });

        tokio::time::timeout(Duration::from_secs(1), submission.confirmed)
            .await
            .unwrap()
            .unwrap();

        let state = model.state().await.unwrap();
        assert_eq!(state.confirmed, state.optimistic);
    }

    #[tokio::test]
    async fn timeout_rolls_back_when_no_confirmation_arrives() {
        let mock = MockBrokerChannel::new();
        let (broker, opts) = options(&mock);
        let model = Model::new("comments", broker, opts).unwrap();
        model.sync().await.unwrap();

        let submission = model
            .optimistic(
                vec![OptimisticEvent {
                    uuid: String::new(),
                    mutation_id: "m1".into(),
                    name: "addComment".into(),
                    data: json!({"id": "c1"}),
                }],
                OptimisticParams {
                    timeout: Some(Duration::from_millis(30)),
                    comparator: None,
                },
            )
            .await
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(1), submission.confirmed)
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ModelError::Timeout));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let state = model.state().await.unwrap();
        assert_eq!(state.optimistic, Comments(vec![]));
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_flushes_subscribers() {
        let mock = MockBrokerChannel::new();
        let (broker, opts) = options(&mock);
        let model = Model::new("comments", broker, opts).unwrap();
        model.sync().await.unwrap();

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = Arc::clone(&errors);
        model.subscribe(
            Arc::new(move |event| {
                if matches!(event, crate::subscription::SubscriberEvent::Error(_)) {
                    errors_clone.fetch_add(1, AtomicOrdering::SeqCst);
                }
            }),
            true,
        );

        model.dispose().await;
        model.dispose().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(errors.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(model.lifecycle(), LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn pause_then_resume_returns_to_ready_and_keeps_applying_confirmations() {
        let mock = MockBrokerChannel::new();
        let (broker, opts) = options(&mock);
        let model = Model::new("comments", broker, opts).unwrap();
        model.sync().await.unwrap();
        assert_eq!(model.lifecycle(), LifecycleState::Ready);

        model.pause();
        model.when_state(LifecycleState::Paused).await;

        model.resume();
        model.when_state(LifecycleState::Ready).await;

        mock.push(RawMessage {
            uuid: "msg-1".into(),
            name: "addComment".into(),
            data: json!({"id": "c1"}),
            mutation_id: Some("m1".into()),
            sequence_id: SequenceId::new("1"),
            rejected: false,
            reject_reason: None,
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = model.state().await.unwrap();
        assert_eq!(state.confirmed, Comments(vec!["c1".to_owned()]));
    }
}
