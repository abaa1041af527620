//! The `MergeEngine`: a stateless fold from `(state, event)` to the next
//! `state`.
//!
//! The merge function itself is caller-supplied and must be pure (no
//! shared mutable state) and deterministic with respect to its arguments.
//! It must tolerate seeing the same logical mutation twice: once as an
//! [`crate::event::Event::Optimistic`] and again as a
//! [`crate::event::Event::Confirmed`]; implementations typically branch on
//! [`crate::event::Event::is_confirmed`].

use std::fmt;
use std::sync::Arc;

use crate::error::ModelError;
use crate::event::Event;

/// Caller-supplied pure fold function.
///
/// Boxed as `Arc<dyn Fn(..) -> ..>` rather than a generic type parameter
/// threaded through every component, mirroring how `eventually`'s
/// `Aggregate::apply` keeps the fold at the type level for aggregates but
/// `SyncEngine`'s snapshot closure (its nearest analogue to a
/// user-supplied async function) is stored as a boxed closure -- this
/// crate's merge function is supplied once, at Model construction, by
/// application code that does not need a generic parameter at every call
/// site.
pub type MergeFn<S> = Arc<dyn Fn(&S, &Event) -> Result<S, String> + Send + Sync>;

/// Stateless engine that applies one event to a state value via the
/// caller-supplied [`MergeFn`].
///
/// If the merge function returns an error, that is surfaced to the Model
/// as [`ModelError::Merge`] and is terminal: merge failures indicate a
/// programming error in the caller's fold function, not a transient
/// condition that can be retried.
#[derive(Clone)]
pub struct MergeEngine<S> {
    merge: MergeFn<S>,
}

impl<S> fmt::Debug for MergeEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeEngine").finish_non_exhaustive()
    }
}

impl<S> MergeEngine<S> {
    /// Creates a new `MergeEngine` wrapping the provided fold function.
    pub fn new(merge: MergeFn<S>) -> Self {
        Self { merge }
    }

    /// Applies `event` to `state`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Merge`] if the caller-supplied function
    /// fails.
    pub fn apply(&self, state: &S, event: &Event) -> Result<S, ModelError> {
        (self.merge)(state, event).map_err(ModelError::Merge)
    }

    /// Applies a sequence of events in order, folding left to right.
    ///
    /// Used by the `OptimisticLayer` to recompute `optimistic` as
    /// `confirmed` folded forward through the outstanding list, and by the
    /// `SyncEngine` when no intermediate snapshots are wanted.
    ///
    /// # Errors
    ///
    /// Returns the first [`ModelError::Merge`] encountered; subsequent
    /// events in `events` are not applied.
    pub fn apply_all<'a, I>(&self, state: &S, events: I) -> Result<S, ModelError>
    where
        S: Clone,
        I: IntoIterator<Item = &'a Event>,
    {
        let mut current = state.clone();
        for event in events {
            current = self.apply(&current, event)?;
        }
        Ok(current)
    }
}
