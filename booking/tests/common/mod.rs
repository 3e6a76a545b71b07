//! Shared fixtures for the booking integration tests.

#![allow(dead_code)] // Each test binary uses a different subset
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use flightdeck_booking::conditions::{ConditionCheck, ConditionCheckError, ConditionsReport};
use flightdeck_booking::{App, Config, Dependencies, FlightService, SagaKeying};
use flightdeck_booking::saga::{BookingRequest, BookingStage};
use flightdeck_runtime::in_memory::{InMemoryEventBus, InMemoryEventStore};
use flightdeck_testing::{eventually, test_clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A slot well after the fixed test clock.
pub const SLOT: &str = "2030-01-01-10";

/// Upper bound for asynchronous propagation in tests.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Condition check returning a canned answer, optionally after a delay.
pub struct StubCheck {
    answer: Result<ConditionsReport, ConditionCheckError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubCheck {
    pub fn favourable() -> Self {
        Self::answering(Ok(ConditionsReport::permissive(SLOT)))
    }

    pub fn unfavourable() -> Self {
        Self::answering(Ok(ConditionsReport {
            meets_requirements: false,
            thunderstorm_probability: 80,
            ..ConditionsReport::permissive(SLOT)
        }))
    }

    pub fn malformed() -> Self {
        Self::answering(Err(ConditionCheckError::Malformed("expected value at line 1".to_string())))
    }

    pub fn unavailable() -> Self {
        Self::answering(Err(ConditionCheckError::Unavailable("connection refused".to_string())))
    }

    /// Favourable, but only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::favourable()
        }
    }

    fn answering(answer: Result<ConditionsReport, ConditionCheckError>) -> Self {
        Self {
            answer,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConditionCheck for StubCheck {
    async fn check(&self, slot_id: &str) -> Result<ConditionsReport, ConditionCheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer.clone().map(|report| ConditionsReport {
            slot_id: slot_id.to_string(),
            ..report
        })
    }
}

/// Application plus handles on its in-memory backends.
pub struct TestApp {
    pub app: App,
    pub service: FlightService,
    pub event_store: Arc<InMemoryEventStore>,
    pub event_bus: Arc<InMemoryEventBus>,
    pub check: Arc<StubCheck>,
}

/// Test configuration: fast retries, short condition check bound.
pub fn test_config(keying: SagaKeying) -> Config {
    let mut config = Config::default();
    config.saga.keying = keying;
    config.saga.condition_check_timeout = Duration::from_millis(200);
    config.consumers.max_retries = 2;
    config.consumers.retry_delay = Duration::from_millis(5);
    config.consumers.reconnect_delay = Duration::from_millis(5);
    config
}

pub async fn start_with(config: &Config, check: StubCheck, event_bus: InMemoryEventBus) -> TestApp {
    let event_store = Arc::new(InMemoryEventStore::new());
    let event_bus = Arc::new(event_bus);
    let check = Arc::new(check);

    let app = App::start(
        config,
        Dependencies {
            event_store: Arc::clone(&event_store) as _,
            event_bus: Arc::clone(&event_bus) as _,
            condition_check: Arc::clone(&check) as _,
            clock: Arc::new(test_clock()),
        },
    )
    .await
    .expect("application starts");

    TestApp {
        service: app.service(),
        app,
        event_store,
        event_bus,
        check,
    }
}

pub async fn start(check: StubCheck) -> TestApp {
    start_with(&test_config(SagaKeying::PerBooking), check, InMemoryEventBus::new()).await
}

pub fn request(booking_id: &str) -> BookingRequest {
    BookingRequest {
        student_id: "S1".to_string(),
        aircraft_id: "A1".to_string(),
        instructor_id: "I1".to_string(),
        booking_id: booking_id.to_string(),
    }
}

impl TestApp {
    /// Mark S1, A1 and I1 available in [`SLOT`].
    pub async fn mark_crew_available(&self) {
        self.mark_crew_available_in(SLOT).await;
    }

    /// Mark S1, A1 and I1 available in `slot_id`.
    pub async fn mark_crew_available_in(&self, slot_id: &str) {
        for (id, kind) in [("S1", "STUDENT"), ("A1", "AIRCRAFT"), ("I1", "INSTRUCTOR")] {
            self.service
                .mark_available(slot_id, id, kind)
                .await
                .expect("mark available");
        }
    }

    /// Wait until the saga under `key` stops, returning its final stage.
    pub async fn settled_saga(&self, key: &str) -> BookingStage {
        let service = &self.service;
        let settled = eventually(SETTLE, move || async move {
            service
                .saga_status(key)
                .await
                .is_some_and(|saga| saga.stage.is_terminal())
        })
        .await;
        assert!(settled, "saga {key} did not settle");

        self.service
            .saga_status(key)
            .await
            .expect("saga exists")
            .stage
    }

    /// Wait until the view row of `participant_id` in [`SLOT`] has `status`.
    pub async fn view_shows(&self, participant_id: &str, status: &str) -> bool {
        let view = self.app.view();
        let view = &view;
        eventually(SETTLE, move || async move {
            view.row(SLOT, participant_id)
                .await
                .is_some_and(|row| row.status == status)
        })
        .await
    }

    /// Number of events stored for [`SLOT`].
    pub async fn slot_event_count(&self) -> usize {
        let stream_id = self.app.slots().stream_id(SLOT);
        self.event_store.events(&stream_id).await.len()
    }
}
