//! Process-local event store and event bus.
//!
//! Used by the bundled binary and by tests. Nothing survives a restart.
//! Both backends carry a fault switch ([`InMemoryEventStore::fail_appends`],
//! [`InMemoryEventBus::fail_publish`]) so failure paths can be driven from
//! the outside.

use flightdeck_core::event::SerializedEvent;
use flightdeck_core::event_bus::{EventBus, EventBusError, EventStream};
use flightdeck_core::event_store::{EventStore, EventStoreError};
use flightdeck_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, mpsc};

/// Event store kept in a process-local map.
///
/// A stream's version is the number of events it holds.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamId, Vec<SerializedEvent>>>,
    fail_appends: AtomicBool,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append fail with `DatabaseError` (or stop doing so).
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Every event of a stream, oldest first.
    pub async fn events(&self, stream_id: &StreamId) -> Vec<SerializedEvent> {
        self.streams
            .read()
            .await
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of every stream that holds at least one event.
    pub async fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Total number of stored events across all streams.
    pub async fn total_events(&self) -> usize {
        self.streams.read().await.values().map(Vec::len).sum()
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(EventStoreError::DatabaseError(
                    "appends are switched off".to_string(),
                ));
            }

            let mut streams = self.streams.write().await;
            let stream = streams.entry(stream_id.clone()).or_default();
            let actual = Version::new(stream.len() as u64);

            if let Some(expected) = expected_version {
                if expected != actual {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual,
                    });
                }
            }

            stream.extend(events);
            Ok(Version::new(stream.len() as u64))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let skip = from_version.map_or(0, |v| usize::try_from(v.value()).unwrap_or(usize::MAX));
            let streams = self.streams.read().await;
            Ok(streams
                .get(&stream_id)
                .map(|events| events.iter().skip(skip).cloned().collect())
                .unwrap_or_default())
        })
    }
}

struct Subscriber {
    topics: Vec<String>,
    sender: mpsc::UnboundedSender<SerializedEvent>,
}

/// Event bus that fans events out to in-process subscribers.
///
/// Only events published after a subscription reach it. With
/// [`InMemoryEventBus::with_duplicate_delivery`] every event is delivered
/// twice, the way an at-least-once broker may redeliver.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    published: RwLock<Vec<(String, SerializedEvent)>>,
    duplicate_delivery: bool,
    fail_publish: AtomicBool,
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("duplicate_delivery", &self.duplicate_delivery)
            .finish_non_exhaustive()
    }
}

impl InMemoryEventBus {
    /// Create a bus that delivers every event once.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver every event twice to each subscriber.
    #[must_use]
    pub const fn with_duplicate_delivery(mut self) -> Self {
        self.duplicate_delivery = true;
        self
    }

    /// Make every following publish fail (or stop doing so).
    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Everything published so far, as `(topic, event)` pairs.
    pub async fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.published.read().await.clone()
    }

    /// Events published to one topic.
    pub async fn published_to(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .read()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "publishing is switched off".to_string(),
                });
            }

            self.published.write().await.push((topic.clone(), event.clone()));

            let copies = if self.duplicate_delivery { 2 } else { 1 };
            let mut subscribers = self.subscribers.write().await;
            subscribers.retain(|subscriber| !subscriber.sender.is_closed());
            for subscriber in subscribers.iter().filter(|s| s.topics.contains(&topic)) {
                for _ in 0..copies {
                    // A receiver dropped since `retain` just misses the event.
                    let _ = subscriber.sender.send(event.clone());
                }
            }
            tracing::trace!(%topic, event_type = %event.event_type, "Published in memory");
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();

        Box::pin(async move {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            self.subscribers
                .write()
                .await
                .push(Subscriber { topics, sender });

            let stream = async_stream::stream! {
                while let Some(event) = receiver.recv().await {
                    yield Ok(event);
                }
            };
            let stream: EventStream = Box::pin(stream);
            Ok(stream)
        })
    }
}
