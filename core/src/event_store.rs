//! Event store abstraction: append-only streams with optimistic concurrency.
//!
//! The store is the source of truth for every aggregate. Events are appended
//! before they are published, and every append states the version it expects
//! the stream to be at so two writers can never interleave silently.
//!
//! ```no_run
//! use flightdeck_core::event_store::{EventStore, EventStoreError};
//! use flightdeck_core::stream::{StreamId, Version};
//!
//! async fn append_then_load<S: EventStore>(store: &S) -> Result<(), EventStoreError> {
//!     let stream_id = StreamId::new("slot-2031-06-01-14");
//!     let version = store.append_events(stream_id.clone(), Some(Version::INITIAL), vec![]).await?;
//!     let events = store.load_events(stream_id, None).await?;
//!     assert_eq!(events.len() as u64, version.value());
//!     Ok(())
//! }
//! ```

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone)]
pub enum EventStoreError {
    /// The stream moved on since the writer last read it.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version the writer expected.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// Backend storage failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Event store abstraction for storing and retrieving event streams.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be shared as
/// `Arc<dyn EventStore>` inside effects.
pub trait EventStore: Send + Sync {
    /// Append events to a stream.
    ///
    /// All events of one call are stored atomically. With `Some(expected)` the
    /// append fails unless the stream is exactly at `expected`; `None` skips the
    /// check. Returns the stream version after the append.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stream is not at `expected_version`
    /// - `DatabaseError`: the backend failed
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;

    /// Load events of a stream in append order.
    ///
    /// `from_version` skips the first `n` events. An unknown stream yields an
    /// empty vector.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>;
}
