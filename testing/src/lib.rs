//! # Flightdeck Testing
//!
//! Test support for reducers and event-sourced services.
//!
//! This crate provides:
//! - A fixed [`Clock`] for futurity checks
//! - [`eventually`] to wait on eventually consistent read models
//! - [`ReducerTest`], a Given/When/Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use flightdeck_runtime::in_memory::{InMemoryEventBus, InMemoryEventStore};
//! use flightdeck_testing::{eventually, test_clock};
//!
//! #[tokio::test]
//! async fn booking_reaches_the_view() {
//!     let event_store = Arc::new(InMemoryEventStore::new());
//!     let event_bus = Arc::new(InMemoryEventBus::new().with_duplicate_delivery());
//!     let app = App::in_memory(event_store, event_bus, test_clock()).await?;
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use flightdeck_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// # Example
    ///
    /// ```
    /// use flightdeck_testing::mocks::FixedClock;
    /// use flightdeck_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Install a `tracing` subscriber honouring `RUST_LOG`; repeated calls are no-ops.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Poll `check` until it returns `true` or `timeout` elapses.
    ///
    /// Returns whether the condition was met. Used to wait for eventually
    /// consistent projections.
    pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub use helpers::{eventually, init_test_tracing};
pub use mocks::{FixedClock, test_clock};
