//! Event-sourced aggregate instances, one [`Store`] per key.
//!
//! The repository rebuilds an instance by replaying its stream through the
//! reducer, then serves commands for that key one at a time. The reducer
//! reports how a command ended by feeding back an action whose
//! [`AggregateAction::outcome`] is `Some`.
//!
//! ```text
//! execute(key, cmd)
//!   ├─ instance(key)      hydrate from `{category}-{key}` on first use
//!   ├─ gate.lock()        one in-flight command per key
//!   └─ send_and_wait_for  Committed | Rejected | Failed
//!                                              └─ instance evicted, next use rehydrates
//! ```

use crate::{Store, StoreError};
use flightdeck_core::event::{Event, EventError, SerializedEvent};
use flightdeck_core::event_store::{EventStore, EventStoreError};
use flightdeck_core::reducer::Reducer;
use flightdeck_core::stream::{StreamId, Version};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome<E> {
    /// Events were appended; the stream is now at `version`.
    Committed {
        /// Stream version after the append
        version: Version,
    },
    /// The command violated a domain rule; nothing was persisted.
    Rejected(E),
    /// Persisting the events failed.
    Failed(String),
}

/// Action type of an event-sourced reducer.
pub trait AggregateAction: Clone + Send + Sync + 'static {
    /// Persisted event type
    type Event: Event + serde::Serialize + DeserializeOwned;

    /// Domain rejection returned to callers
    type Rejection: std::error::Error + Clone + Send + Sync + 'static;

    /// Wrap a stored event so replay can apply it.
    fn from_event(event: Self::Event) -> Self;

    /// `Some` for the action that reports a command's outcome.
    fn outcome(&self) -> Option<CommandOutcome<Self::Rejection>>;
}

/// Errors from [`AggregateRepository::execute`].
#[derive(Debug, Error)]
pub enum RepositoryError<E: std::error::Error> {
    /// The aggregate rejected the command.
    #[error(transparent)]
    Rejected(E),

    /// Appending the events failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// The stream could not be loaded or replayed.
    #[error("Hydration failed: {0}")]
    Hydration(String),

    /// The store did not report an outcome.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<E: std::error::Error> From<EventStoreError> for RepositoryError<E> {
    fn from(error: EventStoreError) -> Self {
        Self::Hydration(error.to_string())
    }
}

impl<E: std::error::Error> From<EventError> for RepositoryError<E> {
    fn from(error: EventError) -> Self {
        Self::Hydration(error.to_string())
    }
}

struct Instance<R>
where
    R: Reducer,
{
    store: Store<R::State, R::Action, R::Environment, R>,
    gate: Arc<Mutex<()>>,
    evicted: AtomicBool,
}

type InstanceMap<R> = HashMap<String, Arc<Instance<R>>>;

/// Keyed collection of hydrated aggregate stores.
pub struct AggregateRepository<R>
where
    R: Reducer,
{
    category: &'static str,
    reducer: R,
    environment: R::Environment,
    event_store: Arc<dyn EventStore>,
    command_timeout: Duration,
    instances: Arc<Mutex<InstanceMap<R>>>,
}

impl<R> Clone for AggregateRepository<R>
where
    R: Reducer + Clone,
    R::Environment: Clone,
{
    fn clone(&self) -> Self {
        Self {
            category: self.category,
            reducer: self.reducer.clone(),
            environment: self.environment.clone(),
            event_store: Arc::clone(&self.event_store),
            command_timeout: self.command_timeout,
            instances: Arc::clone(&self.instances),
        }
    }
}

impl<R, S, A, E> AggregateRepository<R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
    S: Default + Send + Sync + 'static,
    A: AggregateAction,
    E: Clone + Send + Sync + 'static,
{
    /// Create a repository whose streams are named `{category}-{key}`.
    #[must_use]
    pub fn new(
        category: &'static str,
        reducer: R,
        environment: E,
        event_store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            category,
            reducer,
            environment,
            event_store,
            command_timeout: Duration::from_secs(10),
            instances: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// How long `execute` waits for the reducer to report an outcome.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Stream holding the events of `key`.
    #[must_use]
    pub fn stream_id(&self, key: &str) -> StreamId {
        StreamId::for_category(self.category, key)
    }

    /// Run `command` against the aggregate identified by `key`.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Rejected`]: the aggregate refused the command
    /// - [`RepositoryError::Persistence`]: the append failed; the cached instance
    ///   is dropped so the next command starts from the stored stream
    /// - [`RepositoryError::Hydration`] / [`RepositoryError::Store`]: the instance
    ///   could not be loaded or did not answer in time
    pub async fn execute(
        &self,
        key: &str,
        command: A,
    ) -> Result<Version, RepositoryError<A::Rejection>> {
        let (instance, _gate) = self.gated(key).await?;

        let result = instance
            .store
            .send_and_wait_for(command, |a| a.outcome().is_some(), self.command_timeout)
            .await;

        let outcome = match result.map(|action| action.outcome()) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => CommandOutcome::Failed("no outcome reported".to_string()),
            Err(error) => {
                self.evict(key, &instance).await;
                return Err(error.into());
            },
        };

        match outcome {
            CommandOutcome::Committed { version } => {
                metrics::counter!(
                    "repository.commands",
                    "aggregate" => self.category,
                    "outcome" => "committed"
                )
                .increment(1);
                Ok(version)
            },
            CommandOutcome::Rejected(rejection) => {
                metrics::counter!(
                    "repository.commands",
                    "aggregate" => self.category,
                    "outcome" => "rejected"
                )
                .increment(1);
                Err(RepositoryError::Rejected(rejection))
            },
            CommandOutcome::Failed(reason) => {
                metrics::counter!(
                    "repository.commands",
                    "aggregate" => self.category,
                    "outcome" => "failed"
                )
                .increment(1);
                tracing::error!(aggregate = self.category, key, %reason, "Command failed to persist");
                self.evict(key, &instance).await;
                Err(RepositoryError::Persistence(reason))
            },
        }
    }

    /// Read the committed state of `key`, hydrating it first if needed.
    ///
    /// Waits behind any in-flight command for the key, so the reader never
    /// sees events that are applied but not yet appended.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Hydration`] if the stream cannot be replayed.
    pub async fn state<F, T>(&self, key: &str, f: F) -> Result<T, RepositoryError<A::Rejection>>
    where
        F: FnOnce(&S) -> T,
    {
        let (instance, _gate) = self.gated(key).await?;
        Ok(instance.store.state(f).await)
    }

    /// Instance of `key` with its gate held.
    async fn gated(
        &self,
        key: &str,
    ) -> Result<(Arc<Instance<R>>, OwnedMutexGuard<()>), RepositoryError<A::Rejection>> {
        loop {
            let instance = self.instance(key).await?;
            let gate = Arc::clone(&instance.gate).lock_owned().await;
            // An instance evicted while we queued on its gate is stale.
            if !instance.evicted.load(Ordering::Acquire) {
                return Ok((instance, gate));
            }
        }
    }

    /// Drop every cached instance; later calls rehydrate from the event store.
    pub async fn clear(&self) {
        let mut instances = self.instances.lock().await;
        for instance in instances.values() {
            instance.evicted.store(true, Ordering::Release);
        }
        instances.clear();
    }

    async fn instance(&self, key: &str) -> Result<Arc<Instance<R>>, RepositoryError<A::Rejection>> {
        let mut instances = self.instances.lock().await;
        if let Some(instance) = instances.get(key) {
            return Ok(Arc::clone(instance));
        }

        let instance = Arc::new(self.hydrate(key).await?);
        instances.insert(key.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    async fn hydrate(&self, key: &str) -> Result<Instance<R>, RepositoryError<A::Rejection>> {
        let stream_id = self.stream_id(key);
        let events: Vec<SerializedEvent> = self.event_store.load_events(stream_id.clone(), None).await?;

        let store = Store::new(S::default(), self.reducer.clone(), self.environment.clone());
        for serialized in &events {
            let event: A::Event = serialized.decode()?;
            store.send(A::from_event(event)).await?;
        }

        metrics::counter!("repository.hydrations", "aggregate" => self.category).increment(1);
        tracing::debug!(stream_id = %stream_id, events = events.len(), "Hydrated aggregate");

        Ok(Instance {
            store,
            gate: Arc::new(Mutex::new(())),
            evicted: AtomicBool::new(false),
        })
    }

    async fn evict(&self, key: &str, instance: &Arc<Instance<R>>) {
        instance.evicted.store(true, Ordering::Release);
        let mut instances = self.instances.lock().await;
        if instances
            .get(key)
            .is_some_and(|cached| Arc::ptr_eq(cached, instance))
        {
            instances.remove(key);
        }
        tracing::warn!(aggregate = self.category, key, "Evicted aggregate instance");
    }
}
