//! Reconciliation engine for server-authoritative, optimistically-mutated
//! realtime models.
//!
//! This crate materialises a server-authoritative data entity (a
//! "model") on top of a realtime event-delivery channel: it bootstraps
//! from a point-in-time snapshot plus a sequence identifier, fans out
//! broker events into an ordered pipeline, applies optimistic mutations
//! immediately to a projected view while retaining a separately
//! confirmed view, matches confirmations against outstanding optimistic
//! events, and resyncs on discontinuity -- converging with the server
//! even across disconnection, reordering, gaps, and mutation failure.
//!
//! The broker channel itself -- ordered publish/subscribe with history
//! and connection-state events -- is consumed only through
//! [`broker::BrokerChannel`]; this crate does not implement a transport.
//!
//! ```no_run
//! use std::sync::Arc;
//! use models_core::broker::BrokerChannel;
//! use models_core::config::{ModelOptions, OptimisticEventOptions, Snapshot, SyncOptions, EventBufferOptions};
//! use models_core::event::Event;
//! use models_core::model::Model;
//! use models_core::sequence::SequenceId;
//! use serde_json::json;
//!
//! # async fn run(broker: Arc<dyn BrokerChannel>) -> Result<(), models_core::error::ModelError> {
//! #[derive(Clone, PartialEq)]
//! struct Comments(Vec<String>);
//!
//! let options = ModelOptions {
//!     channel_name: "comments:room-1".to_owned(),
//!     sync: Arc::new(|| Box::pin(async {
//!         Ok(Snapshot { data: Comments(vec![]), sequence_id: SequenceId::new("0") })
//!     })),
//!     merge: Arc::new(|state: &Comments, event: &Event| {
//!         let mut next = state.0.clone();
//!         next.push(event.data()["id"].as_str().unwrap_or_default().to_owned());
//!         Ok(Comments(next))
//!     }),
//!     optimistic_event_options: OptimisticEventOptions::default(),
//!     sync_options: SyncOptions::default(),
//!     event_buffer_options: EventBufferOptions::default(),
//! };
//!
//! let model = Model::new("comments:room-1", broker, options)?;
//! model.sync().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod merge;
pub mod model;
pub mod optimistic;
pub mod retry;
pub mod sequence;
pub mod state;
pub mod stream;
pub mod subscription;
pub mod sync;

pub use client::ModelsClient;
pub use error::ModelError;
pub use event::{ConfirmedEvent, Event, OptimisticEvent};
pub use model::{LifecycleState, Model, OptimisticSubmission};
pub use sequence::SequenceId;
pub use state::ModelState;
