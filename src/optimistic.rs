//! The `OptimisticLayer`: the heart of the reconciliation engine
//! (spec.md section 4.4).
//!
//! Tracks outstanding optimistic events, maintains the `optimistic`
//! projection as `confirmed` folded forward through that outstanding
//! list (in submission order), matches confirmations against them, and
//! drives rollback on rejection, timeout, or cancellation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ModelError;
use crate::event::{default_comparator, ConfirmedEvent, Event, OptimisticEvent};
use crate::merge::MergeEngine;
use crate::state::ModelState;

/// `(pending, confirmed) -> bool`, the pluggable confirmation comparator.
/// Default: match by `mutationId` when both sides carry one, else by
/// `name == name && data == data`.
pub type Comparator = Arc<dyn Fn(&OptimisticEvent, &ConfirmedEvent) -> bool + Send + Sync>;

/// Per-call options to [`OptimisticLayer::submit`].
#[derive(Clone)]
pub struct OptimisticParams {
    /// Overrides the Model's default confirmation timeout for this batch.
    pub timeout: Option<Duration>,
    /// Overrides the default confirmation comparator for this batch.
    pub comparator: Option<Comparator>,
}

impl Default for OptimisticParams {
    fn default() -> Self {
        Self {
            timeout: None,
            comparator: None,
        }
    }
}

/// A batch of optimistic events submitted together, settling as one unit
/// (spec.md section 9: "batches are atomic to the caller").
struct PendingConfirmation {
    id: String,
    events: Vec<OptimisticEvent>,
    remaining: HashSet<String>,
    comparator: Comparator,
    settle: Option<oneshot::Sender<Result<(), ModelError>>>,
    done: bool,
}

/// Returned by [`OptimisticLayer::submit`]: the caller awaits `confirmed`
/// for the batch's resolution, or calls `cancel` through
/// [`OptimisticLayer::cancel`] with the returned `id`.
pub struct PendingHandle {
    /// Identifies this batch for a later [`OptimisticLayer::cancel`] or
    /// [`OptimisticLayer::timeout`] call.
    pub id: String,
    /// Resolves to `Ok(())` once every event in the batch is confirmed,
    /// or `Err` on rejection, timeout, cancellation, or disposal.
    pub confirmed: oneshot::Receiver<Result<(), ModelError>>,
    /// Effective timeout for this batch (the minimum of any per-call
    /// override and the Model's default).
    pub timeout: Duration,
}

/// The outcome of folding one [`ConfirmedEvent`] into the layer.
pub struct ConfirmAppliedOutcome<S> {
    /// The new state, if this event was not a duplicate.
    pub state: Option<ModelState<S>>,
    /// Ids of [`PendingConfirmation`] batches that settled (resolved or
    /// rejected) as a result of this event.
    pub settled: Vec<String>,
}

/// Tracks outstanding optimistic events and the dual `confirmed`/`optimistic`
/// projections derived from them.
pub struct OptimisticLayer<S> {
    merge: MergeEngine<S>,
    state: ModelState<S>,
    outstanding: Vec<OptimisticEvent>,
    registry: Vec<PendingConfirmation>,
    default_timeout: Duration,
}

impl<S> OptimisticLayer<S>
where
    S: Clone,
{
    /// Creates a new layer seeded with `state` and no outstanding events.
    #[must_use]
    pub fn new(state: ModelState<S>, merge: MergeEngine<S>, default_timeout: Duration) -> Self {
        Self {
            merge,
            state,
            outstanding: Vec::new(),
            registry: Vec::new(),
            default_timeout,
        }
    }

    /// The current dual-projection state.
    #[must_use]
    pub fn state(&self) -> &ModelState<S> {
        &self.state
    }

    /// Number of outstanding optimistic events, for diagnostics and tests.
    #[must_use]
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// Submits a batch of optimistic events (spec.md section 4.4, steps
    /// 1-3): validates, folds each event into `optimistic` in order, and
    /// registers a [`PendingConfirmation`].
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidArgument`] if `events` is empty or any
    /// event is missing a `mutationId`, and [`ModelError::Merge`] if the
    /// merge function fails while folding any event.
    pub fn submit(
        &mut self,
        mut events: Vec<OptimisticEvent>,
        params: OptimisticParams,
    ) -> Result<(ModelState<S>, PendingHandle), ModelError> {
        if events.is_empty() {
            return Err(ModelError::InvalidArgument(
                "optimistic() requires at least one event".to_owned(),
            ));
        }

        for event in &mut events {
            if event.mutation_id.is_empty() {
                return Err(ModelError::InvalidArgument(
                    "every optimistic event must carry a mutationId".to_owned(),
                ));
            }
            if event.uuid.is_empty() {
                event.uuid = Uuid::new_v4().to_string();
            }
        }

        let mut next_optimistic = self.state.optimistic.clone();
        for event in &events {
            next_optimistic = self
                .merge
                .apply(&next_optimistic, &Event::Optimistic(event.clone()))?;
        }
        self.state.optimistic = next_optimistic;
        self.outstanding.extend(events.iter().cloned());

        let remaining: HashSet<String> = events.iter().map(|event| event.uuid.clone()).collect();
        let comparator = params
            .comparator
            .unwrap_or_else(|| Arc::new(default_comparator));
        let timeout = params.timeout.unwrap_or(self.default_timeout);
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.registry.push(PendingConfirmation {
            id: id.clone(),
            events,
            remaining,
            comparator,
            settle: Some(tx),
            done: false,
        });

        Ok((
            self.state.clone(),
            PendingHandle {
                id,
                confirmed: rx,
                timeout,
            },
        ))
    }

    /// Folds one [`ConfirmedEvent`] into `confirmed`, advances the
    /// sequence id, matches it against every outstanding
    /// [`PendingConfirmation`], and recomputes `optimistic` (spec.md
    /// section 4.4, steps 1-5).
    ///
    /// Events with a `sequenceId` not strictly greater than the current
    /// one are discarded as duplicates and produce no observable change.
    ///
    /// A rejection marker removes the matched events without applying
    /// their data, and rejects every [`PendingConfirmation`] that had a
    /// matched event -- including its still-outstanding, non-matched
    /// events, per the partial-failure (batch-atomic) policy.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Merge`] if the merge function fails while
    /// folding the event or recomputing `optimistic`.
    pub fn on_confirmed(
        &mut self,
        event: ConfirmedEvent,
    ) -> Result<ConfirmAppliedOutcome<S>, ModelError> {
        if !event.sequence_id.is_after(&self.state.sequence_id) {
            return Ok(ConfirmAppliedOutcome {
                state: None,
                settled: Vec::new(),
            });
        }

        if event.rejected {
            return self.apply_rejection(event);
        }

        let next_confirmed = self
            .merge
            .apply(&self.state.confirmed, &Event::Confirmed(event.clone()))?;
        self.state.confirmed = next_confirmed;
        self.state.sequence_id = event.sequence_id.clone();

        let mut matched_uuids = HashSet::new();
        let mut settled = Vec::new();

        for pending in &mut self.registry {
            if pending.done {
                continue;
            }

            let matches: Vec<String> = pending
                .remaining
                .iter()
                .filter(|uuid| {
                    pending
                        .events
                        .iter()
                        .find(|e| &e.uuid == *uuid)
                        .is_some_and(|e| (pending.comparator)(e, &event))
                })
                .cloned()
                .collect();

            for uuid in matches {
                pending.remaining.remove(&uuid);
                matched_uuids.insert(uuid);
            }

            if pending.remaining.is_empty() {
                pending.done = true;
                if let Some(tx) = pending.settle.take() {
                    let _ = tx.send(Ok(()));
                }
                settled.push(pending.id.clone());
            }
        }

        self.registry.retain(|pending| !pending.done);
        self.outstanding
            .retain(|event| !matched_uuids.contains(&event.uuid));
        self.recompute_optimistic()?;

        Ok(ConfirmAppliedOutcome {
            state: Some(self.state.clone()),
            settled,
        })
    }

    fn apply_rejection(
        &mut self,
        event: ConfirmedEvent,
    ) -> Result<ConfirmAppliedOutcome<S>, ModelError> {
        self.state.sequence_id = event.sequence_id.clone();

        let reason = event
            .reject_reason
            .clone()
            .unwrap_or_else(|| "rejected by server".to_owned());

        let mut removed_uuids = HashSet::new();
        let mut settled = Vec::new();

        for pending in &mut self.registry {
            if pending.done {
                continue;
            }

            let has_match = pending.events.iter().any(|e| {
                pending.remaining.contains(&e.uuid) && (pending.comparator)(e, &event)
            });

            if has_match {
                for uuid in &pending.remaining {
                    removed_uuids.insert(uuid.clone());
                }
                pending.done = true;
                if let Some(tx) = pending.settle.take() {
                    let _ = tx.send(Err(ModelError::Rejected {
                        reason: reason.clone(),
                    }));
                }
                settled.push(pending.id.clone());
            }
        }

        self.registry.retain(|pending| !pending.done);
        self.outstanding
            .retain(|event| !removed_uuids.contains(&event.uuid));
        self.recompute_optimistic()?;

        Ok(ConfirmAppliedOutcome {
            state: Some(self.state.clone()),
            settled,
        })
    }

    /// Fires a [`ModelError::Timeout`] for the named batch if it has not
    /// yet settled, removing its still-outstanding events.
    ///
    /// Returns the recomputed state if the batch was still pending, or
    /// `None` if it had already settled (confirmed, rejected, or
    /// previously cancelled/timed out).
    pub fn timeout(&mut self, id: &str) -> Option<ModelState<S>> {
        self.settle(id, ModelError::Timeout)
    }

    /// Equivalent to a timeout firing immediately, with reason
    /// [`ModelError::Cancelled`].
    pub fn cancel(&mut self, id: &str) -> Option<ModelState<S>> {
        self.settle(id, ModelError::Cancelled)
    }

    fn settle(&mut self, id: &str, reason: ModelError) -> Option<ModelState<S>> {
        let position = self
            .registry
            .iter()
            .position(|pending| pending.id == id && !pending.done)?;

        let mut pending = self.registry.remove(position);
        pending.done = true;

        if let Some(tx) = pending.settle.take() {
            let _ = tx.send(Err(reason));
        }

        self.outstanding
            .retain(|event| !pending.remaining.contains(&event.uuid));
        let _ = self.recompute_optimistic();

        Some(self.state.clone())
    }

    /// Rejects every outstanding [`PendingConfirmation`] with
    /// [`ModelError::Discarded`] and clears the outstanding list, without
    /// touching `confirmed`/`optimistic` data. Used as step 4 of the
    /// resync protocol, before the snapshot replaces both projections.
    pub fn discard_all(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        for mut pending in self.registry.drain(..) {
            if let Some(tx) = pending.settle.take() {
                let _ = tx.send(Err(ModelError::Discarded {
                    reason: reason.clone(),
                }));
            }
        }
        self.outstanding.clear();
    }

    /// Rejects every outstanding [`PendingConfirmation`] with
    /// [`ModelError::Cancelled`] and clears the outstanding list. Used on
    /// Model disposal.
    pub fn dispose(&mut self) {
        for mut pending in self.registry.drain(..) {
            if let Some(tx) = pending.settle.take() {
                let _ = tx.send(Err(ModelError::Cancelled));
            }
        }
        self.outstanding.clear();
    }

    /// Replaces both projections wholesale, used when adopting a new
    /// snapshot during resync. Callers must have already drained the
    /// outstanding list via [`OptimisticLayer::discard_all`].
    pub fn replace_state(&mut self, state: ModelState<S>) {
        self.state = state;
    }

    fn recompute_optimistic(&mut self) -> Result<(), ModelError> {
        let mut next = self.state.confirmed.clone();
        for event in &self.outstanding {
            next = self
                .merge
                .apply(&next, &Event::Optimistic(event.clone()))?;
        }
        self.state.optimistic = next;
        Ok(())
    }
}
