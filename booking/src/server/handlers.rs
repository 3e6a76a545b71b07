//! Request handlers for the `/flight` routes.

use super::{AppError, AppState};
use crate::saga::{BookingRequest, FlightBooking};
use crate::slot::Timeslot;
use crate::view::SlotList;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use flightdeck_core::stream::Version;
use serde::{Deserialize, Serialize};

/// Body of the availability endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    /// Participant id
    pub participant_id: String,
    /// `STUDENT`, `AIRCRAFT` or `INSTRUCTOR`, any case
    pub participant_type: String,
}

/// Response of a booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingAccepted {
    /// Slot identifier
    pub slot_id: String,
    /// Booking id from the request
    pub booking_id: String,
    /// Key to query the saga with
    pub saga_key: String,
}

/// Response of a stored command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAccepted {
    /// Slot identifier
    pub slot_id: String,
    /// Slot stream version after the command
    pub version: Version,
}

/// `POST /flight/bookings/:slot_id`
pub async fn create_booking(
    State(state): State<AppState>,
    Path(slot_id): Path<String>,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingAccepted>), AppError> {
    tracing::info!(slot_id = %slot_id, booking_id = %request.booking_id, "Creating booking");
    let booking_id = request.booking_id.clone();
    let saga_key = state.service.create_booking(&slot_id, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingAccepted {
            slot_id,
            booking_id,
            saga_key,
        }),
    ))
}

/// `DELETE /flight/bookings/:slot_id/:booking_id`
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path((slot_id, booking_id)): Path<(String, String)>,
) -> Result<Json<CommandAccepted>, AppError> {
    tracing::info!(slot_id = %slot_id, booking_id = %booking_id, "Canceling booking");
    let version = state.service.cancel_booking(&slot_id, &booking_id).await?;
    Ok(Json(CommandAccepted { slot_id, version }))
}

/// `GET /flight/slots/:participant_id`
pub async fn slots_by_participant(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> Json<SlotList> {
    Json(state.service.slots_by_participant(&participant_id, None).await)
}

/// `GET /flight/slots/:participant_id/:status`
pub async fn slots_by_participant_and_status(
    State(state): State<AppState>,
    Path((participant_id, status)): Path<(String, String)>,
) -> Json<SlotList> {
    Json(
        state
            .service
            .slots_by_participant(&participant_id, Some(&status))
            .await,
    )
}

/// `GET /flight/availability/:slot_id`
pub async fn get_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<String>,
) -> Result<Json<Timeslot>, AppError> {
    Ok(Json(state.service.get_slot(&slot_id).await?))
}

/// `POST /flight/availability/:slot_id`
pub async fn mark_available(
    State(state): State<AppState>,
    Path(slot_id): Path<String>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<CommandAccepted>, AppError> {
    tracing::info!(
        slot_id = %slot_id,
        participant_id = %request.participant_id,
        participant_type = %request.participant_type,
        "Marking participant available"
    );
    let version = state
        .service
        .mark_available(&slot_id, &request.participant_id, &request.participant_type)
        .await?;
    Ok(Json(CommandAccepted { slot_id, version }))
}

/// `DELETE /flight/availability/:slot_id`
pub async fn unmark_available(
    State(state): State<AppState>,
    Path(slot_id): Path<String>,
    Json(request): Json<AvailabilityRequest>,
) -> Result<Json<CommandAccepted>, AppError> {
    tracing::info!(
        slot_id = %slot_id,
        participant_id = %request.participant_id,
        participant_type = %request.participant_type,
        "Unmarking participant available"
    );
    let version = state
        .service
        .unmark_available(&slot_id, &request.participant_id, &request.participant_type)
        .await?;
    Ok(Json(CommandAccepted { slot_id, version }))
}

/// `GET /flight/sagas/:key`
pub async fn saga_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<FlightBooking>, AppError> {
    state
        .service
        .saga_status(&key)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("No booking saga with key {key}")))
}
