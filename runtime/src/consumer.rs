//! Event bus consumer with retrying delivery and a dead letter queue.
//!
//! ```text
//! subscribe ─▶ next event ─▶ handler.handle(event)
//!                               │ Err
//!                               ▼
//!                      retry with backoff ── exhausted ─▶ dead letter queue
//! ```
//!
//! Every event a consumer receives is either handled or parked; nothing is
//! dropped silently. Parked events can be redelivered with
//! [`EventConsumer::redrive`] once the downstream problem is fixed.
//!
//! ```rust,ignore
//! let consumer = EventConsumer::builder()
//!     .name("participant-slots")
//!     .topics(vec!["booking-slot-events".to_string()])
//!     .event_bus(event_bus)
//!     .handler(handler)
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let task = consumer.start().await?;
//! ```

use crate::DeadLetterQueue;
use crate::retry::{RetryPolicy, retry_with_backoff};
use async_trait::async_trait;
use flightdeck_core::event::SerializedEvent;
use flightdeck_core::event_bus::{EventBus, EventBusError, EventStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Error returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one event delivered by an [`EventConsumer`].
///
/// Delivery is at-least-once, so handling the same event twice must be safe.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error makes the consumer retry the event; once retries are spent the
    /// event goes to the dead letter queue.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError>;
}

/// Missing builder field.
#[derive(Debug, thiserror::Error)]
#[error("event consumer is missing required field `{0}`")]
pub struct IncompleteConsumer(&'static str);

/// Subscribe-process-reconnect loop for one handler.
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_policy: RetryPolicy,
    dead_letters: DeadLetterQueue<SerializedEvent>,
    reconnect_delay: Duration,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Consumer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dead letter queue shared with this consumer.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<SerializedEvent> {
        self.dead_letters.clone()
    }

    /// Subscribe, then run the consumer on a background task.
    ///
    /// The first subscription happens before this returns, so events
    /// published afterwards are guaranteed to reach the handler.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the initial subscription fails.
    pub async fn start(mut self) -> Result<tokio::task::JoinHandle<()>, EventBusError> {
        let stream = subscribe(self.event_bus.as_ref(), &self.topics, &self.name).await?;
        Ok(tokio::spawn(async move {
            self.run(Some(stream)).await;
        }))
    }

    /// Run the consumer on a background task, subscribing from inside it.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(None).await;
        })
    }

    /// Redeliver every parked event to `handler`.
    ///
    /// Events that fail again go back into the queue with a fresh error message.
    /// Returns the number of events delivered successfully.
    pub async fn redrive(
        handler: &dyn EventHandler,
        dead_letters: &DeadLetterQueue<SerializedEvent>,
        retry_policy: &RetryPolicy,
    ) -> usize {
        let mut delivered = 0;
        for entry in dead_letters.drain() {
            match deliver(handler, &entry.payload, retry_policy).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    dead_letters.push(entry.payload, error.to_string(), retry_policy.max_retries);
                },
            }
        }
        info!(delivered, remaining = dead_letters.len(), "Redrive finished");
        delivered
    }

    async fn run(&mut self, mut initial: Option<EventStream>) {
        info!(consumer = %self.name, "Event consumer started");

        loop {
            let stream = match initial.take() {
                Some(stream) => Ok(stream),
                None => {
                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        result = subscribe(self.event_bus.as_ref(), &self.topics, &self.name) => result,
                    }
                },
            };

            match stream {
                Ok(mut stream) => {
                    if self.process_stream(&mut stream).await {
                        break;
                    }
                    warn!(
                        consumer = %self.name,
                        "Event stream ended, reconnecting in {:?}", self.reconnect_delay
                    );
                },
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe to event bus, retrying in {:?}", self.reconnect_delay
                    );
                },
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {},
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Returns `true` when the loop should stop because shutdown was signalled.
    async fn process_stream(&mut self, stream: &mut EventStream) -> bool {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    return true;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => self.handle_with_retry(event).await,
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                },
                None => return false,
            }
        }
    }

    async fn handle_with_retry(&self, event: SerializedEvent) {
        match deliver(self.handler.as_ref(), &event, &self.retry_policy).await {
            Ok(()) => {
                metrics::counter!("consumer.events.handled", "consumer" => self.name.clone())
                    .increment(1);
            },
            Err(e) => {
                error!(
                    consumer = %self.name,
                    event_type = %event.event_type,
                    error = %e,
                    "Event handling failed after retries, parking in dead letter queue"
                );
                metrics::counter!("consumer.events.dead_lettered", "consumer" => self.name.clone())
                    .increment(1);
                self.dead_letters
                    .push(event, e.to_string(), self.retry_policy.max_retries);
            },
        }
    }
}

async fn subscribe(
    event_bus: &dyn EventBus,
    topics: &[String],
    name: &str,
) -> Result<EventStream, EventBusError> {
    let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
    let stream = event_bus.subscribe(&topic_refs).await?;
    info!(consumer = %name, topics = ?topics, "Subscribed to event bus");
    Ok(stream)
}

async fn deliver(
    handler: &dyn EventHandler,
    event: &SerializedEvent,
    retry_policy: &RetryPolicy,
) -> Result<(), HandlerError> {
    retry_with_backoff(retry_policy, || handler.handle(event)).await
}

/// Builder for configuring an `EventConsumer`.
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_policy: Option<RetryPolicy>,
    dead_letters: Option<DeadLetterQueue<SerializedEvent>>,
    reconnect_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the delivery retry policy (default: [`RetryPolicy::default`]).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Share an existing dead letter queue (default: a new queue alerting above 1000 entries).
    #[must_use]
    pub fn dead_letters(mut self, dead_letters: DeadLetterQueue<SerializedEvent>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Delay before resubscribing after the stream ends (default: 5 seconds).
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Build the `EventConsumer`.
    ///
    /// # Errors
    ///
    /// Returns [`IncompleteConsumer`] naming the first required field
    /// (name, topics, `event_bus`, handler, shutdown) that was not set.
    pub fn build(self) -> Result<EventConsumer, IncompleteConsumer> {
        Ok(EventConsumer {
            name: self.name.ok_or(IncompleteConsumer("name"))?,
            topics: self.topics.ok_or(IncompleteConsumer("topics"))?,
            event_bus: self.event_bus.ok_or(IncompleteConsumer("event_bus"))?,
            handler: self.handler.ok_or(IncompleteConsumer("handler"))?,
            shutdown: self.shutdown.ok_or(IncompleteConsumer("shutdown"))?,
            retry_policy: self.retry_policy.unwrap_or_default(),
            dead_letters: self.dead_letters.unwrap_or_default(),
            reconnect_delay: self.reconnect_delay.unwrap_or(Duration::from_secs(5)),
        })
    }
}
