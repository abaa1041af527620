//! The dual-projection [`ModelState`]: `confirmed` folded forward through
//! outstanding optimistic events yields `optimistic`.
//!
//! Both projections are recomputed, never patched in place, so that
//! subscribers can rely on referential inequality between successive
//! snapshots as a change signal (spec.md section 4.4's ordering
//! invariant).

use crate::config::Snapshot;
use crate::sequence::SequenceId;

/// A point-in-time pair of projections held by a Model.
#[derive(Debug, Clone)]
pub struct ModelState<S> {
    /// The fold of the snapshot with every confirmed event received since,
    /// in delivery order.
    pub confirmed: S,

    /// `confirmed` folded forward with every outstanding optimistic event,
    /// in submission order.
    pub optimistic: S,

    /// The greatest [`SequenceId`] incorporated into `confirmed` so far.
    pub sequence_id: SequenceId,
}

impl<S> ModelState<S> {
    /// Builds the initial state from a snapshot, with no outstanding
    /// optimistic events: `confirmed == optimistic`.
    pub fn from_snapshot(data: S, sequence_id: SequenceId) -> Self
    where
        S: Clone,
    {
        Self {
            optimistic: data.clone(),
            confirmed: data,
            sequence_id,
        }
    }

    /// Whether the empty-pending invariant holds for this snapshot:
    /// `optimistic == confirmed`.
    #[must_use]
    pub fn is_converged(&self) -> bool
    where
        S: PartialEq,
    {
        self.optimistic == self.confirmed
    }
}

impl<S> From<Snapshot<S>> for ModelState<S>
where
    S: Clone,
{
    fn from(snapshot: Snapshot<S>) -> Self {
        Self::from_snapshot(snapshot.data, snapshot.sequence_id)
    }
}
