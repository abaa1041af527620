//! End-to-end reconciliation scenarios against the in-memory broker test
//! double, exercising the Model's public API the way a real caller would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use models_core::broker::mock::MockBrokerChannel;
use models_core::broker::{BrokerChannel, RawMessage};
use models_core::config::{
    EventBufferOptions, ModelOptions, OptimisticEventOptions, Snapshot, SyncOptions,
};
use models_core::event::{Event, OptimisticEvent};
use models_core::model::{LifecycleState, Model};
use models_core::optimistic::OptimisticParams;
use models_core::sequence::SequenceId;
use models_core::subscription::SubscriberEvent;

use serde_json::json;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq)]
struct Comments(Vec<String>);

fn merge_comments(state: &Comments, event: &Event) -> Result<Comments, String> {
    if event.name() != "addComment" {
        return Ok(state.clone());
    }
    let id = event.data()["id"].as_str().unwrap_or_default().to_owned();
    let mut next = state.0.clone();
    if !event.is_confirmed() || !next.contains(&id) {
        next.push(id);
    }
    Ok(Comments(next))
}

fn options_with_snapshot(
    seed: Vec<&'static str>,
    sequence_id: &'static str,
) -> ModelOptions<Comments> {
    ModelOptions {
        channel_name: "comments:room-1".into(),
        sync: Arc::new(move || {
            let seed = seed.clone();
            Box::pin(async move {
                Ok(Snapshot {
                    data: Comments(seed.iter().map(|s| (*s).to_owned()).collect()),
                    sequence_id: SequenceId::new(sequence_id),
                })
            })
        }),
        merge: Arc::new(merge_comments),
        optimistic_event_options: OptimisticEventOptions::default(),
        sync_options: SyncOptions::default(),
        event_buffer_options: EventBufferOptions::default(),
    }
}

fn raw(seq: &str, name: &str, mutation_id: Option<&str>, data: serde_json::Value) -> RawMessage {
    RawMessage {
        uuid: format!("msg-{seq}"),
        name: name.to_owned(),
        data,
        mutation_id: mutation_id.map(str::to_owned),
        sequence_id: SequenceId::new(seq),
        rejected: false,
        reject_reason: None,
    }
}

/// S1 -- add comment happy path.
#[tokio::test]
async fn s1_add_comment_happy_path() {
    let mock = MockBrokerChannel::new();
    let broker: Arc<dyn BrokerChannel> = Arc::new(mock.clone());
    let model = Model::new("room-1", broker, options_with_snapshot(vec![], "0")).unwrap();
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
    assert_eq!(state.confirmed, Comments(vec![]));

    mock.push(raw("1", "addComment", Some("m1"), json!({"id": "c1"})));

    tokio::time::timeout(Duration::from_secs(1), submission.confirmed)
        .await
        .unwrap()
        .unwrap();

    let state = model.state().await.unwrap();
    assert_eq!(state.confirmed, Comments(vec!["c1".to_owned()]));
    assert_eq!(state.optimistic, state.confirmed);
}

/// S2 -- timeout without a confirmation arriving rolls back.
#[tokio::test]
async fn s2_timeout_rolls_back() {
    let mock = MockBrokerChannel::new();
    let broker: Arc<dyn BrokerChannel> = Arc::new(mock.clone());
    let model = Model::new("room-1", broker, options_with_snapshot(vec![], "0")).unwrap();
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
                timeout: Some(Duration::from_millis(50)),
                comparator: None,
            },
        )
        .await
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(1), submission.confirmed)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, models_core::error::ModelError::Timeout));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let state = model.state().await.unwrap();
    assert_eq!(state.optimistic, Comments(vec![]));
    assert_eq!(state.optimistic, state.confirmed);
}

/// S3 -- discontinuity discards outstanding optimistic events and adopts
/// a fresh snapshot.
#[tokio::test]
async fn s3_discontinuity_triggers_resync() {
    let mock = MockBrokerChannel::new();
    let broker: Arc<dyn BrokerChannel> = Arc::new(mock.clone());

    let attempt = Arc::new(AtomicUsize::new(0));
    let attempt_clone = Arc::clone(&attempt);

    let options = ModelOptions {
        channel_name: "comments:room-1".into(),
        sync: Arc::new(move || {
            let attempt = Arc::clone(&attempt_clone);
            Box::pin(async move {
                let call = attempt.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    Ok(Snapshot {
                        data: Comments(vec![]),
                        sequence_id: SequenceId::new("0"),
                    })
                } else {
                    Ok(Snapshot {
                        data: Comments(vec!["c0".to_owned()]),
                        sequence_id: SequenceId::new("5"),
                    })
                }
            })
        }),
        merge: Arc::new(merge_comments),
        optimistic_event_options: OptimisticEventOptions::default(),
        sync_options: SyncOptions::default(),
        event_buffer_options: EventBufferOptions::default(),
    };

    let model = Model::new("room-1", broker, options).unwrap();
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

    mock.suspend();

    let err = tokio::time::timeout(Duration::from_secs(1), submission.confirmed)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, models_core::error::ModelError::Discarded { .. }));

    model.when_state(LifecycleState::Ready).await;
    let state = model.state().await.unwrap();
    assert_eq!(state.confirmed, Comments(vec!["c0".to_owned()]));
    assert_eq!(state.optimistic, state.confirmed);
}

/// S4 -- a duplicate confirmed event (same sequence id) is a no-op.
#[tokio::test]
async fn s4_duplicate_confirmation_is_a_no_op() {
    let mock = MockBrokerChannel::new();
    let broker: Arc<dyn BrokerChannel> = Arc::new(mock.clone());
    let model = Model::new("room-1", broker, options_with_snapshot(vec![], "0")).unwrap();
    model.sync().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    model.subscribe(
        Arc::new(move |event| {
            if let SubscriberEvent::State(state) = event {
                let seen = Arc::clone(&seen_clone);
                tokio::spawn(async move {
                    seen.lock().await.push(state.confirmed.clone());
                });
            }
        }),
        false,
    );

    mock.push(raw("1", "addComment", None, json!({"id": "c1"})));
    tokio::time::sleep(Duration::from_millis(50)).await;
    mock.push(raw("1", "addComment", None, json!({"id": "c1"})));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = model.state().await.unwrap();
    assert_eq!(state.confirmed, Comments(vec!["c1".to_owned()]));

    let observed = seen.lock().await;
    assert_eq!(observed.len(), 1);
}

/// S5 -- out-of-order buffered delivery is re-ordered within the buffer
/// window before being applied.
#[tokio::test]
async fn s5_out_of_order_buffered_delivery_is_reordered() {
    let mock = MockBrokerChannel::new();
    let broker: Arc<dyn BrokerChannel> = Arc::new(mock.clone());

    let mut options = options_with_snapshot(vec![], "0");
    options.event_buffer_options = EventBufferOptions {
        buffer_ms: 50,
        event_orderer: Arc::new(models_core::sequence::compare_default),
    };

    let model = Model::new("room-1", broker, options).unwrap();
    model.sync().await.unwrap();

    mock.push(raw("2", "addComment", None, json!({"id": "c2"})));
    mock.push(raw("1", "addComment", None, json!({"id": "c1"})));

    tokio::time::sleep(Duration::from_millis(150)).await;

    let state = model.state().await.unwrap();
    assert_eq!(
        state.confirmed,
        Comments(vec!["c1".to_owned(), "c2".to_owned()])
    );
}

/// S6 -- a sync function that always fails moves the Model to `errored`
/// once the retry strategy is exhausted, and every subscriber observes
/// exactly one error.
#[tokio::test]
async fn s6_retry_exhaustion_is_terminal() {
    let mock = MockBrokerChannel::new();
    let broker: Arc<dyn BrokerChannel> = Arc::new(mock);

    let options = ModelOptions {
        channel_name: "comments:room-1".into(),
        sync: Arc::new(|| Box::pin(async { Err::<Snapshot<Comments>, _>("boom".to_owned()) })),
        merge: Arc::new(merge_comments),
        optimistic_event_options: OptimisticEventOptions::default(),
        sync_options: SyncOptions {
            retry_strategy: models_core::retry::fixed(1, 3),
            ..SyncOptions::default()
        },
        event_buffer_options: EventBufferOptions::default(),
    };

    let model = Model::new("room-1", broker, options).unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let errors_clone = Arc::clone(&errors);
    model.subscribe(
        Arc::new(move |event| {
            if matches!(event, SubscriberEvent::Error(_)) {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            }
        }),
        true,
    );

    let err = model.sync().await.unwrap_err();
    assert!(matches!(
        err,
        models_core::error::ModelError::SyncExhausted(_)
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(model.lifecycle(), LifecycleState::Errored);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
