//! Error types surfaced by the reconciliation engine.
//!
//! Every kind named in the core specification is represented here. Errors
//! that are purely internal signalling between [`crate::stream`] and
//! [`crate::model`] (stream discontinuity) are *not* part of this enum:
//! they never reach a subscriber or a caller.

use thiserror::Error;

/// Top-level error returned by public [`crate::model::Model`] operations.
#[derive(Debug, Error, Clone)]
pub enum ModelError {
    /// Bad configuration or API misuse, detected synchronously.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A [`crate::client::ModelsClient`] lookup/registration conflict.
    #[error("model {name:?} is already registered with different options")]
    Registration {
        /// Name of the conflicting model.
        name: String,
    },

    /// An `optimistic()` confirmation did not complete within its timeout.
    #[error("optimistic confirmation timed out")]
    Timeout,

    /// An `optimistic()` submission was explicitly cancelled, or the owning
    /// Model was disposed while it was outstanding.
    #[error("optimistic confirmation was cancelled")]
    Cancelled,

    /// Outstanding optimistic events were discarded because the Model
    /// resynced from a new snapshot.
    #[error("optimistic events discarded during resync: {reason}")]
    Discarded {
        /// Why the resync happened.
        reason: String,
    },

    /// The server rejected one or more events in a batch.
    #[error("event rejected by server: {reason}")]
    Rejected {
        /// Server-supplied rejection reason.
        reason: String,
    },

    /// The caller-supplied merge function returned an error. Terminal for
    /// the Model: this indicates a programming error, not a transient
    /// condition.
    #[error("merge function failed: {0}")]
    Merge(String),

    /// The broker channel reported a fatal state (permission denied,
    /// channel failed). Terminal for the Model.
    #[error("broker channel reported a fatal error: {0}")]
    StreamFatal(String),

    /// The snapshot function exhausted its retry strategy. Terminal for
    /// the Model.
    #[error("sync failed and the retry strategy gave up: {0}")]
    SyncExhausted(String),

    /// The Model has been disposed; the operation cannot proceed.
    #[error("model has been disposed")]
    Disposed,
}

impl ModelError {
    /// True for the errors that move a Model to the terminal `errored`
    /// lifecycle state (merge failures and fatal broker errors, per the
    /// spec's recovery policy).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ModelError::Merge(_) | ModelError::StreamFatal(_) | ModelError::SyncExhausted(_)
        )
    }
}

/// Internal signal raised by [`crate::stream::Stream`] when it can no
/// longer guarantee gapless delivery. Recovered locally by the Model via
/// the resync protocol; never surfaced to user callbacks.
#[derive(Debug, Error, Clone)]
pub enum StreamDiscontinuityError {
    /// The broker reported the channel entered a `suspended` state.
    #[error("channel suspended: {0}")]
    Suspended(String),

    /// The channel resumed but without a guarantee that no messages were
    /// lost while detached.
    #[error("channel resumed without a resumed-history guarantee")]
    ResumedWithoutHistory,

    /// The reordering buffer overran its configured capacity.
    #[error("event buffer exhausted")]
    BufferExhausted,
}

/// Error raised synchronously by [`crate::config::ModelOptions::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `eventBufferOptions.bufferMs` was negative.
    #[error("bufferMs must be >= 0, got {0}")]
    NegativeBufferMs(i64),
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::InvalidArgument(err.to_string())
    }
}
