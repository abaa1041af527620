//! Event representation: the unit of change fed through the reconciliation
//! engine, either [`OptimisticEvent`]s submitted locally or
//! [`ConfirmedEvent`]s delivered by the broker.
//!
//! Events are immutable once created: every accessor returns owned or
//! borrowed data, nothing here exposes `&mut` access to a constructed
//! event.

use serde_json::Value;

use crate::sequence::SequenceId;

/// A locally-applied event awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptimisticEvent {
    /// Client-generated identifier for this specific event instance.
    /// Generated if the caller did not supply one.
    pub uuid: String,

    /// Identifier correlating this event with the mutation request that
    /// produced it. Used by the default confirmation comparator.
    pub mutation_id: String,

    /// Event name, e.g. `"addComment"`.
    pub name: String,

    /// Event payload.
    pub data: Value,
}

/// An event delivered by the broker and folded into `confirmed`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConfirmedEvent {
    /// Broker-assigned or client-assigned identifier for this message.
    pub uuid: String,

    /// Position in the confirmed event stream.
    pub sequence_id: SequenceId,

    /// Event name.
    pub name: String,

    /// Event payload.
    pub data: Value,

    /// The `mutationId` that produced this event, if the server echoes it
    /// back in headers.
    pub mutation_id: Option<String>,

    /// True if this confirmation is a rejection of the originating
    /// optimistic event rather than its application.
    pub rejected: bool,

    /// Server-supplied rejection reason, present only when `rejected`.
    pub reject_reason: Option<String>,
}

/// Either variant of event fed to [`crate::merge::MergeFn`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Event {
    /// `confirmed = false` on the wire.
    Optimistic(OptimisticEvent),

    /// `confirmed = true` on the wire.
    Confirmed(ConfirmedEvent),
}

impl Event {
    /// Returns the event name, common to both variants.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Event::Optimistic(e) => &e.name,
            Event::Confirmed(e) => &e.name,
        }
    }

    /// Returns the event payload, common to both variants.
    #[must_use]
    pub fn data(&self) -> &Value {
        match self {
            Event::Optimistic(e) => &e.data,
            Event::Confirmed(e) => &e.data,
        }
    }

    /// True if this is a [`Event::Confirmed`] event.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Event::Confirmed(_))
    }

    /// The `mutationId` carried by the event, if any.
    #[must_use]
    pub fn mutation_id(&self) -> Option<&str> {
        match self {
            Event::Optimistic(e) => Some(&e.mutation_id),
            Event::Confirmed(e) => e.mutation_id.as_deref(),
        }
    }
}

impl From<OptimisticEvent> for Event {
    fn from(event: OptimisticEvent) -> Self {
        Event::Optimistic(event)
    }
}

impl From<ConfirmedEvent> for Event {
    fn from(event: ConfirmedEvent) -> Self {
        Event::Confirmed(event)
    }
}

/// Default confirmation comparator: matches by `mutationId` equality when
/// both sides carry one, otherwise by `name == name && data == data`.
#[must_use]
pub fn default_comparator(pending: &OptimisticEvent, confirmed: &ConfirmedEvent) -> bool {
    match &confirmed.mutation_id {
        Some(mutation_id) => *mutation_id == pending.mutation_id,
        None => pending.name == confirmed.name && pending.data == confirmed.data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn optimistic(mutation_id: &str, name: &str, data: Value) -> OptimisticEvent {
        OptimisticEvent {
            uuid: format!("uuid-{mutation_id}"),
            mutation_id: mutation_id.to_owned(),
            name: name.to_owned(),
            data,
        }
    }

    fn confirmed(
        mutation_id: Option<&str>,
        name: &str,
        data: Value,
        sequence_id: &str,
    ) -> ConfirmedEvent {
        ConfirmedEvent {
            uuid: format!("confirmed-{sequence_id}"),
            sequence_id: SequenceId::new(sequence_id),
            name: name.to_owned(),
            data,
            mutation_id: mutation_id.map(str::to_owned),
            rejected: false,
            reject_reason: None,
        }
    }

    #[test]
    fn matches_by_mutation_id_when_present() {
        let pending = optimistic("m1", "addComment", json!({"id": "c1"}));
        let conf = confirmed(Some("m1"), "addComment", json!({"id": "different"}), "1");

        assert!(default_comparator(&pending, &conf));
    }

    #[test]
    fn falls_back_to_name_and_data_equality_without_mutation_id() {
        let pending = optimistic("m1", "addComment", json!({"id": "c1"}));
        let same = confirmed(None, "addComment", json!({"id": "c1"}), "1");
        let different = confirmed(None, "addComment", json!({"id": "c2"}), "1");

        assert!(default_comparator(&pending, &same));
        assert!(!default_comparator(&pending, &different));
    }

    #[test]
    fn mismatched_mutation_id_never_matches() {
        let pending = optimistic("m1", "addComment", json!({"id": "c1"}));
        let conf = confirmed(Some("m2"), "addComment", json!({"id": "c1"}), "1");

        assert!(!default_comparator(&pending, &conf));
    }
}
