//! Integration tests for `AggregateRepository`.
//!
//! A small hangar aggregate (aircraft parked up to a capacity) exercises
//! hydration, rejections, persistence failures and per-key isolation.

#![allow(clippy::expect_used, clippy::panic)]

use flightdeck_core::effect::Effect;
use flightdeck_core::event::{Event, SerializedEvent};
use flightdeck_core::event_store::{EventStore, EventStoreError};
use flightdeck_core::reducer::Reducer;
use flightdeck_core::stream::{StreamId, Version};
use flightdeck_core::{SmallVec, smallvec};
use flightdeck_runtime::{AggregateAction, AggregateRepository, CommandOutcome, RepositoryError};
use flightdeck_runtime::in_memory::InMemoryEventStore;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};

// ============================================================================
// Test Fixtures
// ============================================================================

const CATEGORY: &str = "hangar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum HangarEvent {
    Parked { hangar: String, tail: String },
}

impl Event for HangarEvent {
    fn event_type(&self) -> &'static str {
        "AircraftParked.v1"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum HangarError {
    #[error("hangar {0} is full")]
    Full(String),
}

#[derive(Debug, Clone)]
enum HangarAction {
    Park { hangar: String, tail: String },
    Applied(HangarEvent),
    Committed { version: Version },
    Rejected(HangarError),
    Failed(String),
}

impl AggregateAction for HangarAction {
    type Event = HangarEvent;
    type Rejection = HangarError;

    fn from_event(event: HangarEvent) -> Self {
        Self::Applied(event)
    }

    fn outcome(&self) -> Option<CommandOutcome<HangarError>> {
        match self {
            Self::Committed { version } => Some(CommandOutcome::Committed { version: *version }),
            Self::Rejected(error) => Some(CommandOutcome::Rejected(error.clone())),
            Self::Failed(reason) => Some(CommandOutcome::Failed(reason.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Hangar {
    parked: Vec<String>,
    version: Version,
}

#[derive(Clone)]
struct HangarEnvironment {
    event_store: Arc<dyn EventStore>,
    capacity: usize,
}

#[derive(Clone)]
struct HangarReducer;

impl Reducer for HangarReducer {
    type State = Hangar;
    type Action = HangarAction;
    type Environment = HangarEnvironment;

    fn reduce(
        &self,
        state: &mut Hangar,
        action: HangarAction,
        env: &HangarEnvironment,
    ) -> SmallVec<[Effect<HangarAction>; 4]> {
        match action {
            HangarAction::Park { hangar, tail } => {
                if state.parked.len() >= env.capacity {
                    return smallvec![Effect::send(HangarAction::Rejected(HangarError::Full(hangar)))];
                }

                let expected = state.version;
                let event = HangarEvent::Parked {
                    hangar: hangar.clone(),
                    tail: tail.clone(),
                };
                state.parked.push(tail);
                state.version = state.version.next();

                let event_store = Arc::clone(&env.event_store);
                smallvec![Effect::Future(Box::pin(async move {
                    let serialized = match SerializedEvent::from_event(&event, None) {
                        Ok(serialized) => serialized,
                        Err(error) => return Some(HangarAction::Failed(error.to_string())),
                    };
                    let outcome = event_store
                        .append_events(
                            StreamId::for_category(CATEGORY, &hangar),
                            Some(expected),
                            vec![serialized],
                        )
                        .await;
                    Some(match outcome {
                        Ok(version) => HangarAction::Committed { version },
                        Err(error) => HangarAction::Failed(error.to_string()),
                    })
                }))]
            },
            HangarAction::Applied(HangarEvent::Parked { tail, .. }) => {
                state.parked.push(tail);
                state.version = state.version.next();
                SmallVec::new()
            },
            HangarAction::Committed { .. } | HangarAction::Rejected(_) | HangarAction::Failed(_) => {
                SmallVec::new()
            },
        }
    }
}

fn repository(
    event_store: &Arc<InMemoryEventStore>,
    capacity: usize,
) -> AggregateRepository<HangarReducer> {
    repository_over(Arc::clone(event_store) as Arc<dyn EventStore>, capacity)
}

fn repository_over(
    event_store: Arc<dyn EventStore>,
    capacity: usize,
) -> AggregateRepository<HangarReducer> {
    AggregateRepository::new(
        CATEGORY,
        HangarReducer,
        HangarEnvironment {
            event_store: Arc::clone(&event_store),
            capacity,
        },
        event_store,
    )
}

/// Event store whose appends wait until [`HeldAppends::release`] is called.
struct HeldAppends {
    inner: Arc<InMemoryEventStore>,
    entered: Notify,
    released: Semaphore,
}

impl HeldAppends {
    fn new(inner: &Arc<InMemoryEventStore>) -> Self {
        Self {
            inner: Arc::clone(inner),
            entered: Notify::new(),
            released: Semaphore::new(0),
        }
    }

    fn release(&self) {
        self.released.add_permits(1);
    }
}

impl EventStore for HeldAppends {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.entered.notify_one();
            let _permit = self
                .released
                .acquire()
                .await
                .map_err(|error| EventStoreError::DatabaseError(error.to_string()))?;
            self.inner
                .append_events(stream_id, expected_version, events)
                .await
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>> {
        self.inner.load_events(stream_id, from_version)
    }
}

fn park(hangar: &str, tail: &str) -> HangarAction {
    HangarAction::Park {
        hangar: hangar.to_string(),
        tail: tail.to_string(),
    }
}

async fn parked(repository: &AggregateRepository<HangarReducer>, hangar: &str) -> Vec<String> {
    repository
        .state(hangar, |h| h.parked.clone())
        .await
        .expect("hangar loads")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn committed_commands_return_stream_version() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let repository = repository(&event_store, 2);

    let first = repository.execute("north", park("north", "G-ABCD")).await;
    let second = repository.execute("north", park("north", "G-EFGH")).await;

    assert_eq!(first.expect("first park"), Version::new(1));
    assert_eq!(second.expect("second park"), Version::new(2));
    assert_eq!(
        event_store.events(&repository.stream_id("north")).await.len(),
        2
    );
}

#[tokio::test]
async fn rejection_is_returned_and_nothing_is_stored() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let repository = repository(&event_store, 1);
    repository
        .execute("north", park("north", "G-ABCD"))
        .await
        .expect("first park");

    let result = repository.execute("north", park("north", "G-EFGH")).await;

    match result {
        Err(RepositoryError::Rejected(HangarError::Full(hangar))) => assert_eq!(hangar, "north"),
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(event_store.total_events().await, 1);
    assert_eq!(parked(&repository, "north").await, vec!["G-ABCD"]);
}

#[tokio::test]
async fn instances_are_hydrated_from_the_stream() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let writer = repository(&event_store, 3);
    writer
        .execute("north", park("north", "G-ABCD"))
        .await
        .expect("park");
    writer
        .execute("north", park("north", "G-EFGH"))
        .await
        .expect("park");

    let reader = repository(&event_store, 3);

    assert_eq!(parked(&reader, "north").await, vec!["G-ABCD", "G-EFGH"]);
    let version = reader
        .execute("north", park("north", "G-IJKL"))
        .await
        .expect("hydrated instance continues the stream");
    assert_eq!(version, Version::new(3));
}

#[tokio::test]
async fn failed_append_evicts_the_optimistic_state() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let repository = repository(&event_store, 3);
    repository
        .execute("north", park("north", "G-ABCD"))
        .await
        .expect("park");

    event_store.fail_appends(true);
    let result = repository.execute("north", park("north", "G-EFGH")).await;
    event_store.fail_appends(false);

    assert!(matches!(result, Err(RepositoryError::Persistence(_))));
    assert_eq!(parked(&repository, "north").await, vec!["G-ABCD"]);
    assert_eq!(
        repository
            .execute("north", park("north", "G-EFGH"))
            .await
            .expect("retry succeeds"),
        Version::new(2)
    );
}

#[tokio::test]
async fn reads_wait_for_the_in_flight_append() {
    let event_store = Arc::new(InMemoryEventStore::new());
    repository(&event_store, 3)
        .execute("north", park("north", "G-ABCD"))
        .await
        .expect("park");

    let held = Arc::new(HeldAppends::new(&event_store));
    let repository = repository_over(Arc::clone(&held) as Arc<dyn EventStore>, 3);
    event_store.fail_appends(true);

    let command = tokio::spawn({
        let repository = repository.clone();
        async move { repository.execute("north", park("north", "G-EFGH")).await }
    });
    held.entered.notified().await;

    let read = tokio::spawn({
        let repository = repository.clone();
        async move { parked(&repository, "north").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!read.is_finished(), "read must wait behind the pending append");

    held.release();
    let result = command.await.expect("command task joins");
    assert!(matches!(result, Err(RepositoryError::Persistence(_))));

    // The applied but never stored G-EFGH is not visible.
    assert_eq!(read.await.expect("read task joins"), vec!["G-ABCD"]);
    event_store.fail_appends(false);
}

#[tokio::test]
async fn keys_are_isolated() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let repository = repository(&event_store, 1);

    repository
        .execute("north", park("north", "G-ABCD"))
        .await
        .expect("park north");
    repository
        .execute("south", park("south", "G-EFGH"))
        .await
        .expect("south has its own capacity");

    assert_eq!(parked(&repository, "north").await, vec!["G-ABCD"]);
    assert_eq!(parked(&repository, "south").await, vec!["G-EFGH"]);
    assert_eq!(event_store.stream_ids().await.len(), 2);
}

#[tokio::test]
async fn concurrent_commands_on_one_key_are_serialized() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let repository = repository(&event_store, 100);

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let repository = repository.clone();
            tokio::spawn(async move {
                repository
                    .execute("north", park("north", &format!("G-{n:04}")))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("task joins").expect("command commits");
    }

    assert_eq!(parked(&repository, "north").await.len(), 20);
    assert_eq!(
        event_store.events(&repository.stream_id("north")).await.len(),
        20
    );
}

#[tokio::test]
async fn clear_forces_rehydration() {
    let event_store = Arc::new(InMemoryEventStore::new());
    let repository = repository(&event_store, 3);
    repository
        .execute("north", park("north", "G-ABCD"))
        .await
        .expect("park");

    repository.clear().await;

    assert_eq!(parked(&repository, "north").await, vec!["G-ABCD"]);
}
