//! Event bus abstraction for cross-aggregate communication.
//!
//! ```text
//! command ─▶ reducer ─▶ 1. append to event store (source of truth)
//!                       2. publish to topic      (at-least-once)
//!                               │
//!                 ┌─────────────┴─────────────┐
//!                 ▼                           ▼
//!       participant-slot consumer     read-model consumer
//! ```
//!
//! Delivery is at-least-once and ordered per topic. Subscribers must tolerate
//! duplicates.
//!
//! Topics follow `{aggregate}-events`: `booking-slot-events`,
//! `participant-slot-events`.

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// The bus was shut down while a subscriber was attached.
    #[error("Event bus closed")]
    Closed,
}

/// Stream of events delivered to one subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Publish/subscribe transport between aggregates and read models.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be shared as
/// `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the transport rejects the event.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics.
    ///
    /// Events published after the subscription is established are delivered in
    /// publish order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
