//! Read models built from events (the query side).
//!
//! A projection consumes events from the event bus and keeps a denormalized
//! view optimized for the queries the HTTP surface serves. Projections lag the
//! write side and must be idempotent: the bus delivers at least once.
//!
//! ```ignore
//! impl Projection for ParticipantSlotsView {
//!     type Event = ParticipantSlotEvent;
//!
//!     fn name(&self) -> &str {
//!         "participant_slots"
//!     }
//!
//!     async fn apply_event(&self, event: &Self::Event) -> Result<()> {
//!         self.upsert(event).await;
//!         Ok(())
//!     }
//! }
//! ```

use serde::Deserialize;
use std::future::Future;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Event processing error
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// A projection builds and maintains a read model from events.
pub trait Projection: Send + Sync {
    /// The event type this projection listens to.
    type Event: for<'de> Deserialize<'de> + Send;

    /// Unique projection name, used in logs and metrics.
    fn name(&self) -> &str;

    /// Apply one event to the read model.
    ///
    /// Applying the same event twice, or an older event after a newer one,
    /// must leave the view unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if event processing or storage fails.
    fn apply_event(&self, event: &Self::Event) -> impl Future<Output = Result<()>> + Send;
}
