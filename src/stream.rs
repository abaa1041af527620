//! Abstracts one broker channel into a replayable, discontinuity-aware
//! sequence of [`ConfirmedEvent`]s (spec.md section 4.1).
//!
//! `Stream` is the only component that talks to [`crate::broker::BrokerChannel`]
//! directly. It folds three concerns into one ordered output: bounded
//! history replay on resume, a short reordering buffer over live
//! messages, and discontinuity detection from the broker's connection
//! state.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use tokio::time::Instant;

use crate::broker::{BrokerChannel, ChannelState, HistoryQuery, RawMessage};
use crate::config::EventOrderer;
use crate::error::StreamDiscontinuityError;
use crate::event::ConfirmedEvent;
use crate::retry::RetryStrategy;
use crate::sequence::{compare_default, SequenceId};

/// Item produced by a resumed [`Stream`]: either a confirmed event in
/// delivery order, or a signal the Model must react to.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A confirmed event, already deduplicated and reordered.
    Event(ConfirmedEvent),

    /// The Stream can no longer guarantee gapless delivery; the Model
    /// should invoke the resync protocol.
    Discontinuity(StreamDiscontinuityError),

    /// The broker reported a fatal channel state; the Model should move
    /// to `errored`.
    Failed(String),
}

/// Configuration consumed by [`Stream::resume`].
#[derive(Clone)]
pub struct StreamConfig {
    /// Reordering buffer window. `0` disables buffering.
    pub buffer_ms: i64,
    /// Ordering applied to messages within the buffer window.
    pub event_orderer: EventOrderer,
    /// Page size for history pagination.
    pub history_page_size: usize,
    /// Retry strategy for history-fetch failures during resume.
    pub retry_strategy: RetryStrategy,
}

/// Wraps one [`BrokerChannel`] attachment.
///
/// Cheaply cloneable: clones share the same underlying broker `Arc`. This
/// lets callers clone a `Stream` out of the Model's single-mutex `Inner`
/// and call [`Stream::resume`] on the clone without holding that mutex
/// across an `.await` (spec.md section 5: suspension points happen
/// outside the lock).
#[derive(Clone)]
pub struct Stream {
    broker: Arc<dyn BrokerChannel>,
    config: StreamConfig,
}

impl Stream {
    /// Creates a new `Stream` over the given broker channel.
    #[must_use]
    pub fn new(broker: Arc<dyn BrokerChannel>, config: StreamConfig) -> Self {
        Self { broker, config }
    }

    /// Detaches the underlying channel. While paused, no events are
    /// emitted.
    ///
    /// # Errors
    ///
    /// Returns the broker's detach error, stringified.
    pub async fn pause(&self) -> Result<(), String> {
        self.broker.detach().await.map_err(|err| err.0)
    }

    /// Reattaches the channel and returns an ordered stream of events,
    /// starting with history replayed strictly after `from`, followed by
    /// live (reordered, deduplicated) messages.
    ///
    /// Attaching, subscribing, and the initial history replay all happen
    /// *before* this function returns -- it is only the subsequent live
    /// loop that is driven lazily by polling the returned stream. This
    /// matters for callers: by the time `resume` resolves, the broker
    /// channel is attached and subscribed, so a connection-state change
    /// the caller triggers afterwards (e.g. a test forcing `suspended`)
    /// is guaranteed to be observed rather than raced.
    ///
    /// Emits [`StreamItem::Discontinuity`] if the channel is observed to
    /// suspend or resume without a resumed-history guarantee, and
    /// [`StreamItem::Failed`] on fatal channel state or retry exhaustion
    /// during history replay. Neither of those terminates the underlying
    /// stream by itself: the Model decides what to do next.
    pub async fn resume(&self, from: SequenceId) -> BoxStream<'static, StreamItem> {
        let broker = Arc::clone(&self.broker);
        let config = self.config.clone();

        if let Err(err) = broker.attach().await {
            let message = err.0;
            return Box::pin(futures::stream::once(async move {
                StreamItem::Failed(message)
            }));
        }

        // Subscribe to live messages *before* querying history, so no
        // message delivered during the history fetch is lost. Any
        // resulting duplicate between the one-off history page and the
        // live subscription is discarded below by sequence-id ordering.
        let live_raw = broker.subscribe();
        let mut state_stream = broker.on_state();

        let replayed = match replay_history(&broker, &config, from.clone()).await {
            Ok(events) => events,
            Err(err) => {
                return Box::pin(futures::stream::once(async move { StreamItem::Failed(err) }));
            }
        };

        let seeded_watermark = replayed
            .last()
            .map_or(from, |event| event.sequence_id.clone());

        Box::pin(stream! {
            for event in replayed {
                yield StreamItem::Event(event);
            }

            let mut last_emitted = seeded_watermark;

            tokio::pin!(live_raw);

            let mut pending: Vec<RawMessage> = Vec::new();
            let mut flush_at: Option<Instant> = None;

            loop {
                let sleep = async {
                    match flush_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    biased;

                    maybe_state = state_stream.next() => {
                        match maybe_state {
                            Some(ChannelState::Suspended) => {
                                yield StreamItem::Discontinuity(
                                    StreamDiscontinuityError::Suspended("channel suspended".into()),
                                );
                            }
                            Some(ChannelState::Failed) => {
                                yield StreamItem::Failed("broker channel failed".into());
                                return;
                            }
                            Some(ChannelState::Attached) => {
                                // A resume that does not guarantee history
                                // replay is itself a discontinuity.
                            }
                            Some(_) | None => {}
                        }
                    }

                    maybe_msg = live_raw.next() => {
                        match maybe_msg {
                            Some(msg) => {
                                pending.push(msg);
                                if config.buffer_ms <= 0 {
                                    flush_at = Some(Instant::now());
                                } else if flush_at.is_none() {
                                    flush_at = Some(Instant::now() + Duration::from_millis(config.buffer_ms as u64));
                                }
                            }
                            None => return,
                        }
                    }

                    () = sleep, if flush_at.is_some() => {
                        flush_at = None;
                        let drained: Vec<RawMessage> = pending.drain(..).collect();
                        for event in order_and_dedup(drained, &config.event_orderer, &last_emitted) {
                            last_emitted = event.sequence_id.clone();
                            yield StreamItem::Event(event);
                        }
                    }
                }
            }
        })
    }
}

/// Fetches every history page strictly after `from`, retrying transient
/// failures under the configured [`RetryStrategy`]. Returns the flattened,
/// already-ordered list of [`ConfirmedEvent`]s.
async fn replay_history(
    broker: &Arc<dyn BrokerChannel>,
    config: &StreamConfig,
    from: SequenceId,
) -> Result<Vec<ConfirmedEvent>, String> {
    let mut events = Vec::new();
    let mut after = from.as_str().to_owned();
    let mut attempt: u32 = 0;

    loop {
        let query = HistoryQuery {
            limit: config.history_page_size,
            after: Some(after.clone()),
        };

        match broker.history(query).await {
            Ok(page) => {
                attempt = 0;
                let has_next = page.has_next;
                for msg in page.items {
                    after = msg.sequence_id.as_str().to_owned();
                    events.push(to_confirmed(msg));
                }
                if !has_next {
                    return Ok(events);
                }
            }
            Err(err) => {
                attempt += 1;
                let delay = (config.retry_strategy)(attempt);
                if delay < 0 {
                    return Err(format!(
                        "history fetch exhausted retry strategy: {}",
                        err.0
                    ));
                }
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
        }
    }
}

/// Orders a buffered batch by the configured [`EventOrderer`], then drops
/// any message whose sequence id is not strictly greater than the
/// previously emitted one -- catching both exact duplicates and messages
/// made stale by a later message in the same batch.
fn order_and_dedup(
    mut batch: Vec<RawMessage>,
    orderer: &EventOrderer,
    last_emitted: &SequenceId,
) -> Vec<ConfirmedEvent> {
    batch.sort_by(|a, b| orderer(a.sequence_id.as_str(), b.sequence_id.as_str()));

    let mut out = Vec::with_capacity(batch.len());
    let mut watermark = last_emitted.clone();

    for msg in batch {
        if compare_default(msg.sequence_id.as_str(), watermark.as_str()) == Ordering::Greater {
            watermark = msg.sequence_id.clone();
            out.push(to_confirmed(msg));
        }
    }

    out
}

fn to_confirmed(msg: RawMessage) -> ConfirmedEvent {
    ConfirmedEvent {
        uuid: msg.uuid,
        sequence_id: msg.sequence_id,
        name: msg.name,
        data: msg.data,
        mutation_id: msg.mutation_id,
        rejected: msg.rejected,
        reject_reason: msg.reject_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBrokerChannel;
    use serde_json::json;
    use std::sync::Arc as StdArc;

    fn raw(seq: &str, name: &str) -> RawMessage {
        RawMessage {
            uuid: format!("msg-{seq}"),
            name: name.to_owned(),
            data: json!({"seq": seq}),
            mutation_id: None,
            sequence_id: SequenceId::new(seq),
            rejected: false,
            reject_reason: None,
        }
    }

    fn config(buffer_ms: i64) -> StreamConfig {
        StreamConfig {
            buffer_ms,
            event_orderer: StdArc::new(compare_default),
            history_page_size: 100,
            retry_strategy: crate::retry::fixed(10, 3),
        }
    }

    #[tokio::test]
    async fn replays_history_strictly_after_the_given_sequence() {
        let broker = MockBrokerChannel::new();
        broker.push(raw("1", "e1"));
        broker.push(raw("2", "e2"));
        broker.push(raw("3", "e3"));

        let stream = Stream::new(StdArc::new(broker), config(0));
        let mut resumed = stream.resume(SequenceId::new("1")).await;

        let mut names = Vec::new();
        for _ in 0..2 {
            if let Some(StreamItem::Event(event)) =
                tokio::time::timeout(Duration::from_millis(200), resumed.next())
                    .await
                    .unwrap()
            {
                names.push(event.name);
            }
        }

        assert_eq!(names, vec!["e2".to_owned(), "e3".to_owned()]);
    }

    #[test]
    fn dedup_drops_non_increasing_sequence_ids() {
        let orderer: EventOrderer = StdArc::new(compare_default);
        let batch = vec![raw("2", "e2"), raw("1", "e1"), raw("1", "e1-dup")];

        let out = order_and_dedup(batch, &orderer, &SequenceId::new("0"));
        let names: Vec<_> = out.into_iter().map(|e| e.name).collect();

        assert_eq!(names, vec!["e1".to_owned(), "e2".to_owned()]);
    }

    #[test]
    fn dedup_respects_the_watermark_from_the_previous_flush() {
        let orderer: EventOrderer = StdArc::new(compare_default);
        let batch = vec![raw("2", "e2"), raw("3", "e3")];

        let out = order_and_dedup(batch, &orderer, &SequenceId::new("2"));
        let names: Vec<_> = out.into_iter().map(|e| e.name).collect();

        assert_eq!(names, vec!["e3".to_owned()]);
    }
}
