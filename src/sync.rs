//! The `SyncEngine`: owns the snapshot-to-stream splice point (spec.md
//! section 4.2).
//!
//! The snapshot function may be invoked multiple times over a Model's
//! lifetime: once for the initial sync, and again on every resync
//! triggered by a stream discontinuity.

use std::time::Duration;

use crate::config::{Snapshot, SyncFn};
use crate::retry::RetryStrategy;

/// Invokes the caller-supplied snapshot function, retrying transient
/// failures under the configured [`RetryStrategy`].
pub struct SyncEngine<S> {
    sync_fn: SyncFn<S>,
    retry_strategy: RetryStrategy,
}

impl<S> SyncEngine<S> {
    /// Creates a new `SyncEngine` from the caller-supplied snapshot
    /// function and retry strategy.
    #[must_use]
    pub fn new(sync_fn: SyncFn<S>, retry_strategy: RetryStrategy) -> Self {
        Self {
            sync_fn,
            retry_strategy,
        }
    }

    /// Fetches a fresh [`Snapshot`], retrying under the configured
    /// [`RetryStrategy`] until it succeeds or the strategy gives up.
    ///
    /// # Errors
    ///
    /// Returns the last snapshot error, stringified, once the retry
    /// strategy returns `-1`. This is terminal for the owning Model
    /// (spec.md section 7: "Snapshot failures honour the retry strategy;
    /// its exhaustion is terminal").
    pub async fn snapshot(&self) -> Result<Snapshot<S>, String> {
        let mut attempt: u32 = 0;

        loop {
            match (self.sync_fn)().await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => {
                    attempt += 1;
                    let delay = (self.retry_strategy)(attempt);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, error = %err, "snapshot attempt failed");

                    if delay < 0 {
                        return Err(err);
                    }

                    tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::sequence::SequenceId;

    #[tokio::test]
    async fn succeeds_on_the_first_attempt() {
        let engine = SyncEngine::new(
            Arc::new(|| {
                Box::pin(async {
                    Ok(Snapshot {
                        data: 42,
                        sequence_id: SequenceId::new("0"),
                    })
                })
            }),
            crate::retry::fixed(1, -1),
        );

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.data, 42);
    }

    #[tokio::test]
    async fn retries_until_the_strategy_gives_up() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_for_closure = Arc::clone(&attempts);

        let engine = SyncEngine::new(
            Arc::new(move || {
                attempts_for_closure.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err("boom".to_owned()) })
            }),
            crate::retry::fixed(1, 3),
        );

        let err = engine.snapshot().await.unwrap_err();

        assert_eq!(err, "boom");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
