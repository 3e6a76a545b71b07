//! End-to-end booking scenarios.
//!
//! Each test starts the full application on in-memory backends: commands go
//! through the booking saga and the slot aggregate, committed events travel
//! over the bus to the participant slot aggregates and on into the view.

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use common::{SETTLE, SLOT, StubCheck, TestApp, request, start};
use flightdeck_booking::saga::BookingStage;
use flightdeck_booking::slot::{SlotAction, SlotEvent};
use flightdeck_booking::{Resolution, ServiceError, SlotError};
use flightdeck_core::event::SerializedEvent;
use flightdeck_runtime::RepositoryError;
use flightdeck_testing::eventually;
use std::time::Duration;

async fn slot_events(app: &TestApp) -> Vec<SlotEvent> {
    let stream_id = app.app.slots().stream_id(SLOT);
    app.event_store
        .events(&stream_id)
        .await
        .iter()
        .map(|event: &SerializedEvent| event.decode::<SlotEvent>().expect("slot event decodes"))
        .collect()
}

fn booked(events: &[SlotEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SlotEvent::ParticipantBooked { .. }))
        .count()
}

fn canceled(events: &[SlotEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, SlotEvent::ParticipantCanceled { .. }))
        .count()
}

// ============================================================================
// Booking
// ============================================================================

#[tokio::test]
async fn booking_available_crew_books_all_three() {
    let app = start(StubCheck::favourable()).await;
    app.mark_crew_available().await;

    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");

    assert_eq!(
        app.settled_saga(&key).await,
        BookingStage::Resolved(Resolution::Booked)
    );
    assert_eq!(booked(&slot_events(&app).await), 3);

    for participant_id in ["S1", "A1", "I1"] {
        assert!(app.view_shows(participant_id, "booked").await, "{participant_id} not booked");
        let row = app
            .app
            .view()
            .row(SLOT, participant_id)
            .await
            .expect("row exists");
        assert_eq!(row.booking_id, "b1");
    }

    let slot = app.service.get_slot(SLOT).await.expect("slot loads");
    assert!(slot.available.is_empty());
    assert_eq!(slot.find_booking("b1").map(<[_]>::len), Some(3));
}

#[tokio::test]
async fn booking_without_aircraft_is_rejected() {
    let app = start(StubCheck::favourable()).await;
    app.service
        .mark_available(SLOT, "S1", "STUDENT")
        .await
        .expect("mark student");
    app.service
        .mark_available(SLOT, "I1", "INSTRUCTOR")
        .await
        .expect("mark instructor");
    let before = app.slot_event_count().await;

    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");

    match app.settled_saga(&key).await {
        BookingStage::Resolved(Resolution::Rejected(reason)) => {
            assert!(reason.contains("not bookable"), "unexpected reason: {reason}");
        },
        other => panic!("expected a rejected booking, got {other}"),
    }
    assert_eq!(app.slot_event_count().await, before);
    assert_eq!(booked(&slot_events(&app).await), 0);

    let rows = app.service.slots_by_participant("S1", Some("booked")).await;
    assert!(rows.slots.is_empty());
}

#[tokio::test]
async fn direct_reservation_without_aircraft_reports_not_bookable() {
    let app = start(StubCheck::favourable()).await;
    app.service
        .mark_available(SLOT, "S1", "STUDENT")
        .await
        .expect("mark student");
    app.service
        .mark_available(SLOT, "I1", "INSTRUCTOR")
        .await
        .expect("mark instructor");

    let result = app
        .app
        .slots()
        .execute(
            SLOT,
            SlotAction::BookReservation {
                slot_id: SLOT.to_string(),
                student_id: "S1".to_string(),
                aircraft_id: "A1".to_string(),
                instructor_id: "I1".to_string(),
                booking_id: "b1".to_string(),
            },
        )
        .await;

    assert!(matches!(
        result,
        Err(RepositoryError::Rejected(SlotError::NotBookable { .. }))
    ));
    assert_eq!(app.slot_event_count().await, 2);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn canceling_a_booking_cancels_all_three() {
    let app = start(StubCheck::favourable()).await;
    app.mark_crew_available().await;
    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");
    app.settled_saga(&key).await;

    app.service
        .cancel_booking(SLOT, "b1")
        .await
        .expect("cancel succeeds");

    assert_eq!(canceled(&slot_events(&app).await), 3);
    for participant_id in ["S1", "A1", "I1"] {
        assert!(
            app.view_shows(participant_id, "cancelled").await,
            "{participant_id} not cancelled"
        );
    }

    let slot = app.service.get_slot(SLOT).await.expect("slot loads");
    assert!(slot.find_booking("b1").is_none());
    assert!(slot.is_bookable("S1", "A1", "I1"));
}

#[tokio::test]
async fn canceling_unknown_booking_fails() {
    let app = start(StubCheck::favourable()).await;
    app.mark_crew_available().await;

    let result = app.service.cancel_booking(SLOT, "nope").await;

    assert!(matches!(
        result,
        Err(ServiceError::Slot(SlotError::BookingNotFound { .. }))
    ));
    assert_eq!(canceled(&slot_events(&app).await), 0);
}

// ============================================================================
// Condition check outcomes
// ============================================================================

#[tokio::test]
async fn unfavourable_conditions_skip_the_booking() {
    let app = start(StubCheck::unfavourable()).await;
    app.mark_crew_available().await;
    let before = app.service.get_slot(SLOT).await.expect("slot loads");

    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");

    assert_eq!(
        app.settled_saga(&key).await,
        BookingStage::Resolved(Resolution::Skipped)
    );
    let saga = app.service.saga_status(&key).await.expect("saga exists");
    let report = saga.condition_report.expect("report kept");
    assert!(!report.meets_requirements);

    let after = app.service.get_slot(SLOT).await.expect("slot loads");
    assert_eq!(after, before);
    assert_eq!(booked(&slot_events(&app).await), 0);
}

#[tokio::test]
async fn slow_condition_check_fails_the_saga() {
    let app = start(StubCheck::slow(Duration::from_secs(10))).await;
    app.mark_crew_available().await;

    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");

    match app.settled_saga(&key).await {
        BookingStage::Failed(reason) => assert!(reason.contains("timed out"), "{reason}"),
        other => panic!("expected a failed saga, got {other}"),
    }
    assert_eq!(booked(&slot_events(&app).await), 0);
    assert!(app.service.get_slot(SLOT).await.expect("slot loads").bookings.is_empty());
}

#[tokio::test]
async fn unavailable_condition_check_fails_the_saga() {
    let app = start(StubCheck::unavailable()).await;
    app.mark_crew_available().await;

    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");

    assert!(matches!(app.settled_saga(&key).await, BookingStage::Failed(_)));
    assert_eq!(booked(&slot_events(&app).await), 0);
}

#[tokio::test]
async fn malformed_report_fails_open() {
    let app = start(StubCheck::malformed()).await;
    app.mark_crew_available().await;

    let key = app
        .service
        .create_booking(SLOT, request("b1"))
        .await
        .expect("booking accepted");

    assert_eq!(
        app.settled_saga(&key).await,
        BookingStage::Resolved(Resolution::Booked)
    );
}

// ============================================================================
// Availability and validation
// ============================================================================

#[tokio::test]
async fn unmarking_withdraws_availability_in_view() {
    let app = start(StubCheck::favourable()).await;
    app.service
        .mark_available(SLOT, "S1", "student")
        .await
        .expect("mark succeeds");
    assert!(app.view_shows("S1", "available").await);

    app.service
        .unmark_available(SLOT, "S1", "STUDENT")
        .await
        .expect("unmark succeeds");

    assert!(app.view_shows("S1", "not available").await);
    let slot = app.service.get_slot(SLOT).await.expect("slot loads");
    assert!(slot.available.is_empty());

    let listed = app.service.slots_by_participant("S1", None).await;
    assert_eq!(listed.slots.len(), 1);
    assert_eq!(listed.slots[0].participant_type, "STUDENT");
}

#[tokio::test]
async fn past_and_malformed_slots_are_refused() {
    let app = start(StubCheck::favourable()).await;

    let past = app.service.mark_available("2020-01-01-10", "S1", "STUDENT").await;
    assert!(matches!(past, Err(ServiceError::Validation(_))));

    let malformed = app.service.create_booking("tomorrow", request("b1")).await;
    assert!(matches!(malformed, Err(ServiceError::Validation(_))));

    let unknown_type = app.service.mark_available(SLOT, "S1", "PILOT").await;
    assert!(matches!(unknown_type, Err(ServiceError::Validation(_))));

    assert_eq!(app.slot_event_count().await, 0);
    assert_eq!(app.check.calls(), 0);
}

#[tokio::test]
async fn participant_slot_streams_follow_slot_events() {
    let app = start(StubCheck::favourable()).await;
    app.mark_crew_available().await;

    let participants = app.app.participants();
    let stream_id = participants.stream_id(&format!("{SLOT}-A1"));
    let store = &app.event_store;
    let stream_id = &stream_id;
    let propagated = eventually(SETTLE, move || async move {
        store.events(stream_id).await.len() == 1
    })
    .await;

    assert!(propagated);
}
