//! `ModelsClient`: a registry of named [`Model`]s (spec.md section 3
//! "Ownership", section 4.7 of `SPEC_FULL.md`).
//!
//! One `ModelsClient` typically corresponds to one application session;
//! it hands out `Model` handles by name and guarantees a given name maps
//! to exactly one underlying `Model` for the lifetime of the client.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::broker::BrokerChannel;
use crate::config::ModelOptions;
use crate::error::ModelError;
use crate::model::Model;

/// Registry of [`Model`]s keyed by name.
///
/// The registry's map is guarded by an `RwLock` -- reads (`get`, `models`)
/// are far more frequent than writes (`get_or_create`) in the
/// request-response shape this registry is used from, the same tradeoff
/// the teacher makes for its in-memory event store's data source.
pub struct ModelsClient<S> {
    models: RwLock<HashMap<String, Model<S>>>,
}

impl<S> Default for ModelsClient<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ModelsClient<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the `Model` registered under `name`, if any, without
    /// creating one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Model<S>> {
        self.models.read().unwrap().get(name).cloned()
    }

    /// Returns the `Model` registered under `name`, constructing and
    /// registering a new one from `broker`/`options` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidArgument`] if `options` is invalid
    /// (see [`ModelOptions::validate`]).
    pub fn get_or_create(
        &self,
        name: impl Into<String>,
        broker: Arc<dyn BrokerChannel>,
        options: ModelOptions<S>,
    ) -> Result<Model<S>, ModelError> {
        let name = name.into();

        if let Some(model) = self.models.read().unwrap().get(&name) {
            return Ok(model.clone());
        }

        let model = Model::new(name.clone(), broker, options)?;

        let mut models = self.models.write().unwrap();
        // Another task may have raced us between the read above and this
        // write lock; prefer whichever model won that race so callers
        // never observe two distinct Models behind the same name.
        Ok(models.entry(name).or_insert(model).clone())
    }

    /// Registers `model` under `name`, failing if a different `Model` is
    /// already registered there.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Registration`] if `name` is already taken.
    pub fn register(&self, name: impl Into<String>, model: Model<S>) -> Result<(), ModelError> {
        let name = name.into();
        let mut models = self.models.write().unwrap();
        if models.contains_key(&name) {
            return Err(ModelError::Registration { name });
        }
        models.insert(name, model);
        Ok(())
    }

    /// Names of every currently registered `Model`.
    #[must_use]
    pub fn models(&self) -> Vec<String> {
        self.models.read().unwrap().keys().cloned().collect()
    }

    /// Disposes and deregisters the `Model` named `name`, if present.
    pub async fn dispose(&self, name: &str) {
        let model = self.models.write().unwrap().remove(name);
        if let Some(model) = model {
            model.dispose().await;
        }
    }

    /// Disposes every registered `Model` and clears the registry. Used by
    /// application shutdown paths (supplemented feature, `SPEC_FULL.md`
    /// section 4.7 -- not present in the distilled spec, not excluded by
    /// any of its Non-goals).
    pub async fn dispose_all(&self) {
        let models: Vec<Model<S>> = self.models.write().unwrap().drain().map(|(_, m)| m).collect();
        for model in models {
            model.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockBrokerChannel;
    use crate::config::{EventBufferOptions, OptimisticEventOptions, Snapshot, SyncOptions};
    use crate::event::Event;
    use crate::sequence::SequenceId;

    fn options() -> ModelOptions<u32> {
        ModelOptions {
            channel_name: "room".into(),
            sync: Arc::new(|| {
                Box::pin(async {
                    Ok(Snapshot {
                        data: 0,
                        sequence_id: SequenceId::new("0"),
                    })
                })
            }),
            merge: Arc::new(|state: &u32, _event: &Event| Ok(*state)),
            optimistic_event_options: OptimisticEventOptions::default(),
            sync_options: SyncOptions::default(),
            event_buffer_options: EventBufferOptions::default(),
        }
    }

    #[test]
    fn get_or_create_returns_the_same_model_on_repeated_calls() {
        let client: ModelsClient<u32> = ModelsClient::new();
        let broker: Arc<dyn BrokerChannel> = Arc::new(MockBrokerChannel::new());

        let first = client
            .get_or_create("room-1", Arc::clone(&broker), options())
            .unwrap();
        let second = client
            .get_or_create("room-1", broker, options())
            .unwrap();

        assert_eq!(first.name(), second.name());
        assert_eq!(client.models(), vec!["room-1".to_owned()]);
    }

    #[test]
    fn register_rejects_a_conflicting_name() {
        let client: ModelsClient<u32> = ModelsClient::new();
        let broker: Arc<dyn BrokerChannel> = Arc::new(MockBrokerChannel::new());
        let model = Model::new("room-1", broker, options()).unwrap();

        client.register("room-1", model.clone()).unwrap();
        let err = client.register("room-1", model).unwrap_err();

        assert!(matches!(err, ModelError::Registration { .. }));
    }

    #[tokio::test]
    async fn dispose_all_empties_the_registry() {
        let client: ModelsClient<u32> = ModelsClient::new();
        let broker: Arc<dyn BrokerChannel> = Arc::new(MockBrokerChannel::new());
        client
            .get_or_create("room-1", broker, options())
            .unwrap();

        client.dispose_all().await;
        assert!(client.models().is_empty());
    }
}
