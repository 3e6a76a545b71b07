//! Append-then-publish effect shared by the event-sourced aggregates.
//!
//! Reducers apply new events to their state right away and return the effect
//! built here. The effect appends all events of the command in one call at the
//! version the state was at, publishes each event once the append succeeded,
//! and feeds the outcome back to the reducer.
//!
//! Every stored event carries its stream and its position in the stream in
//! the metadata (`{"streamId": .., "version": n}`). Consumers use the version
//! to tell a late redelivery from news.

use flightdeck_core::effect::Effect;
use flightdeck_core::event::{Event, SerializedEvent};
use flightdeck_core::event_bus::EventBus;
use flightdeck_core::event_store::EventStore;
use flightdeck_core::stream::{StreamId, Version};
use flightdeck_runtime::DeadLetterQueue;
use flightdeck_runtime::retry::{RetryPolicy, retry_with_backoff};
use serde::Serialize;
use std::sync::Arc;

/// An event that could not be published after retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Undelivered {
    /// Topic the event was meant for
    pub topic: String,
    /// The committed event
    pub event: SerializedEvent,
}

/// Dependencies of the event-sourced reducers.
#[derive(Clone)]
pub struct PersistenceEnvironment {
    /// Source of truth for aggregate streams
    pub event_store: Arc<dyn EventStore>,
    /// Bus that carries committed events to consumers
    pub event_bus: Arc<dyn EventBus>,
    /// Retry policy for publishing
    pub publish_retry: RetryPolicy,
    /// Committed events whose publication failed
    pub undelivered: DeadLetterQueue<Undelivered>,
}

impl PersistenceEnvironment {
    /// Environment with the default publish retry policy and a 1000 entry queue.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            event_store,
            event_bus,
            publish_retry: RetryPolicy::default(),
            undelivered: DeadLetterQueue::default(),
        }
    }

    /// Replace the publish retry policy.
    #[must_use]
    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    /// Share an existing queue for undelivered events.
    #[must_use]
    pub fn with_undelivered(mut self, queue: DeadLetterQueue<Undelivered>) -> Self {
        self.undelivered = queue;
        self
    }

    async fn publish_all(&self, topic: &str, events: &[SerializedEvent]) {
        for event in events {
            let published = retry_with_backoff(&self.publish_retry, || {
                self.event_bus.publish(topic, event)
            })
            .await;

            if let Err(error) = published {
                tracing::error!(
                    topic,
                    event_type = %event.event_type,
                    %error,
                    "Publishing committed event failed, parking it"
                );
                self.undelivered.push(
                    Undelivered {
                        topic: topic.to_string(),
                        event: event.clone(),
                    },
                    error.to_string(),
                    self.publish_retry.max_retries,
                );
            }
        }
    }
}

/// Position of `event` in its source stream, read from the metadata.
#[must_use]
pub fn stream_version(event: &SerializedEvent) -> Option<Version> {
    event
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("version"))
        .and_then(serde_json::Value::as_u64)
        .map(Version::new)
}

/// Build the effect that persists `events` and reports the outcome.
///
/// `on_outcome` receives the new stream version, or the reason the events
/// could not be stored. Publication failures do not change the outcome: the
/// events are committed and wait in [`PersistenceEnvironment::undelivered`].
pub fn persist<E, A, F>(
    env: &PersistenceEnvironment,
    stream_id: StreamId,
    expected: Version,
    topic: &'static str,
    events: Vec<E>,
    on_outcome: F,
) -> Effect<A>
where
    E: Event + Serialize,
    A: Send + 'static,
    F: FnOnce(Result<Version, String>) -> A + Send + 'static,
{
    let env = env.clone();

    Effect::Future(Box::pin(async move {
        let serialized = match events
            .iter()
            .zip(1..)
            .map(|(event, offset)| {
                let metadata = serde_json::json!({
                    "streamId": stream_id.as_str(),
                    "version": expected.value() + offset,
                });
                SerializedEvent::from_event(event, Some(metadata))
            })
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(serialized) => serialized,
            Err(error) => return Some(on_outcome(Err(error.to_string()))),
        };

        match env
            .event_store
            .append_events(stream_id.clone(), Some(expected), serialized.clone())
            .await
        {
            Ok(version) => {
                tracing::debug!(stream_id = %stream_id, %version, events = serialized.len(), "Events appended");
                env.publish_all(topic, &serialized).await;
                Some(on_outcome(Ok(version)))
            },
            Err(error) => {
                tracing::error!(stream_id = %stream_id, %error, "Appending events failed");
                Some(on_outcome(Err(error.to_string())))
            },
        }
    }))
}
