//! Retry strategies consumed by [`crate::sync::SyncEngine`] and
//! [`crate::stream::Stream`] when a snapshot or history fetch fails
//! transiently.
//!
//! A `RetryStrategy` is a plain function from an attempt counter to a
//! delay in milliseconds, or `-1` to give up -- the same "plug in a
//! function, not a trait object hierarchy" shape the teacher crate uses
//! for its free-function combinators (e.g.
//! `eventstore::with_global_sequence_number`).

use std::sync::Arc;

/// `(attempt) -> delay_ms | -1`. Attempts are 1-indexed.
pub type RetryStrategy = Arc<dyn Fn(u32) -> i64 + Send + Sync>;

/// A fixed delay between attempts, giving up after `max_attempts` (or
/// never, if `max_attempts` is `-1`).
#[must_use]
pub fn fixed(duration_ms: i64, max_attempts: i64) -> RetryStrategy {
    Arc::new(move |attempt| {
        if max_attempts >= 0 && i64::from(attempt) > max_attempts {
            return -1;
        }
        duration_ms
    })
}

/// Exponential backoff: `initial_ms * factor^(attempt - 1)`, capped at
/// `max_ms`, giving up after `max_attempts` (or never, if `max_attempts`
/// is `-1`).
#[must_use]
pub fn exponential_backoff(
    factor: f64,
    initial_ms: i64,
    max_attempts: i64,
    max_ms: i64,
) -> RetryStrategy {
    Arc::new(move |attempt| {
        if max_attempts >= 0 && i64::from(attempt) > max_attempts {
            return -1;
        }

        let exponent = attempt.saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        let delay = (initial_ms as f64) * factor.powi(exponent as i32);

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.min(max_ms as f64) as i64;

        delay_ms.max(0)
    })
}

/// Default retry strategy used by [`crate::config::ModelOptions`]: fixed
/// 1000ms delay, unbounded attempts.
#[must_use]
pub fn default_strategy() -> RetryStrategy {
    fixed(1000, -1)
}
