//! # Flightdeck Runtime
//!
//! Executes reducers written against `flightdeck-core`.
//!
//! - [`Store`] owns a reducer's state, runs its effects and feeds the
//!   resulting actions back in.
//! - [`AggregateRepository`] keeps one store per aggregate key, rebuilt from
//!   the event store, and runs commands for a key one at a time.
//! - [`EventConsumer`] delivers bus events to an [`EventHandler`], retrying
//!   with [`RetryPolicy`] and parking failures in a [`DeadLetterQueue`].
//! - [`in_memory`] provides an event store and bus that live in the process.
//!
//! ```ignore
//! use flightdeck_runtime::Store;
//!
//! let store = Store::new(BookingSagas::default(), BookingSagaReducer, environment);
//! store.send(SagaAction::Start { .. }).await?;
//! let stage = store.state(|s| s.get(&key).map(|b| b.stage.clone())).await;
//! ```

/// Per-key aggregate instances hydrated from the event store
pub mod aggregate;

/// Event bus consumers with retry and dead-lettering
pub mod consumer;

/// Dead letter queue
pub mod dead_letter;

/// Process-local event store and event bus
pub mod in_memory;

/// Prometheus metrics recorder
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Reducer runtime
pub mod store;

pub use aggregate::{AggregateAction, AggregateRepository, CommandOutcome, RepositoryError};
pub use consumer::{EventConsumer, EventHandler};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use retry::RetryPolicy;
pub use store::{EffectHandle, Store};

/// Store errors.
pub mod error {
    use thiserror::Error;

    /// Why a store call failed.
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// The store no longer accepts actions.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Effects were still running when the shutdown deadline passed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// No matching action arrived in time.
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast closed.
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;
