//! Caller-supplied per-model configuration (spec.md section 6), with the
//! defaults named there.

use std::cmp::Ordering;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ConfigError;
use crate::merge::MergeFn;
use crate::retry::{self, RetryStrategy};
use crate::sequence::SequenceId;

/// `() -> { data, sequenceId }`, invoked by the `SyncEngine` on initial
/// sync and every resync.
pub type SyncFn<S> = Arc<dyn Fn() -> BoxFuture<'static, Result<Snapshot<S>, String>> + Send + Sync>;

/// The result of a snapshot fetch.
#[derive(Debug, Clone)]
pub struct Snapshot<S> {
    /// Seed data for both projections.
    pub data: S,
    /// The Model's current sequence after adopting this snapshot.
    pub sequence_id: SequenceId,
}

/// `(a, b) -> Ordering`, the pluggable ordering used by the Stream's
/// reordering buffer. Default: numeric when both sides parse as
/// integers, lexicographic otherwise.
pub type EventOrderer = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// Sync-related options.
#[derive(Clone)]
pub struct SyncOptions {
    /// Page size for history pagination on resume. Default 100.
    pub history_page_size: usize,
    /// How far back in time history is retained by the broker. Default
    /// 2 minutes.
    pub message_retention_period: std::time::Duration,
    /// Retry strategy for snapshot and history-fetch failures. Default:
    /// fixed 1000ms, infinite attempts.
    pub retry_strategy: RetryStrategy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            history_page_size: 100,
            message_retention_period: std::time::Duration::from_secs(120),
            retry_strategy: retry::default_strategy(),
        }
    }
}

/// Reordering-buffer options.
#[derive(Clone)]
pub struct EventBufferOptions {
    /// Reordering buffer window, in milliseconds. Must be `>= 0`. Default
    /// 0 (no buffering).
    pub buffer_ms: i64,
    /// The ordering applied within the buffer window. Default: numeric
    /// sequence-id comparison, falling back to lexicographic.
    pub event_orderer: EventOrderer,
}

impl Default for EventBufferOptions {
    fn default() -> Self {
        Self {
            buffer_ms: 0,
            event_orderer: Arc::new(crate::sequence::compare_default),
        }
    }
}

/// Per-`optimistic()`-submission options (spec.md section 4.4).
#[derive(Clone)]
pub struct OptimisticEventOptions {
    /// Confirmation timeout. Default 120000ms.
    pub timeout: std::time::Duration,
}

impl Default for OptimisticEventOptions {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_millis(120_000),
        }
    }
}

/// Full per-model configuration.
#[derive(Clone)]
pub struct ModelOptions<S> {
    /// Broker channel name this Model attaches to.
    pub channel_name: String,
    /// Snapshot function.
    pub sync: SyncFn<S>,
    /// Merge function.
    pub merge: MergeFn<S>,
    /// Default timeout applied to `optimistic()` submissions that don't
    /// override it.
    pub optimistic_event_options: OptimisticEventOptions,
    /// Sync-related options.
    pub sync_options: SyncOptions,
    /// Reordering-buffer options.
    pub event_buffer_options: EventBufferOptions,
}

impl<S> ModelOptions<S> {
    /// Validates synchronously-detectable misconfiguration, per spec.md
    /// section 6 ("`eventBufferOptions.bufferMs < 0` fails construction").
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NegativeBufferMs`] if `buffer_ms` is
    /// negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer_options.buffer_ms < 0 {
            return Err(ConfigError::NegativeBufferMs(
                self.event_buffer_options.buffer_ms,
            ));
        }
        Ok(())
    }
}
