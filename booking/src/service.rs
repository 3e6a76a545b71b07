//! Boundary operations used by the HTTP layer.
//!
//! Input is validated here, before anything reaches an aggregate or the saga:
//! slot id format on every operation, futurity on the mutating ones.

use crate::participant::{Participant, ParticipantType};
use crate::saga::{BookingRequest, BookingSagaReducer, BookingSagas, FlightBooking, SagaAction, SagaEnvironment, SagaKeying};
use crate::slot::{SlotAction, SlotError, SlotRepository, Timeslot};
use crate::slot_id::{SlotId, ValidationError, require_non_empty};
use crate::view::{ParticipantSlotsView, SlotList};
use flightdeck_core::environment::Clock;
use flightdeck_core::stream::Version;
use flightdeck_runtime::{RepositoryError, Store, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Store running every booking saga.
pub type SagaStore = Store<BookingSagas, SagaAction, SagaEnvironment, BookingSagaReducer>;

/// Errors surfaced to callers of [`FlightService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input rejected at the boundary.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The slot refused the command.
    #[error(transparent)]
    Slot(SlotError),

    /// The command could not be carried out.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError<SlotError>> for ServiceError {
    fn from(error: RepositoryError<SlotError>) -> Self {
        match error {
            RepositoryError::Rejected(rejection) => Self::Slot(rejection),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(error: StoreError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

/// Booking, availability and query operations.
#[derive(Clone)]
pub struct FlightService {
    clock: Arc<dyn Clock>,
    slots: SlotRepository,
    sagas: SagaStore,
    view: Arc<ParticipantSlotsView>,
    keying: SagaKeying,
}

impl FlightService {
    /// Assemble the service.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        slots: SlotRepository,
        sagas: SagaStore,
        view: Arc<ParticipantSlotsView>,
        keying: SagaKeying,
    ) -> Self {
        Self {
            clock,
            slots,
            sagas,
            view,
            keying,
        }
    }

    /// Start the booking saga for `request` on `slot_id`.
    ///
    /// Returns the saga key. Starting a key that already has a saga succeeds
    /// without doing anything.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for a bad or past slot id or blank ids,
    /// [`ServiceError::Unavailable`] if the saga store is shutting down.
    pub async fn create_booking(
        &self,
        slot_id: &str,
        request: BookingRequest,
    ) -> Result<String, ServiceError> {
        let slot = self.future_slot(slot_id)?;
        require_non_empty("studentId", &request.student_id)?;
        require_non_empty("aircraftId", &request.aircraft_id)?;
        require_non_empty("instructorId", &request.instructor_id)?;
        require_non_empty("bookingId", &request.booking_id)?;

        let key = self.keying.key(slot.as_str(), &request);
        self.sagas
            .send(SagaAction::Start {
                key: key.clone(),
                slot_id: slot.to_string(),
                request,
            })
            .await?;

        Ok(key)
    }

    /// Cancel a booking.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for a bad or past slot id,
    /// [`ServiceError::Slot`] with [`SlotError::BookingNotFound`] for an unknown booking,
    /// [`ServiceError::Unavailable`] when the events cannot be stored.
    pub async fn cancel_booking(&self, slot_id: &str, booking_id: &str) -> Result<Version, ServiceError> {
        let slot = self.future_slot(slot_id)?;
        require_non_empty("bookingId", booking_id)?;

        let version = self
            .slots
            .execute(
                slot.as_str(),
                SlotAction::CancelBooking {
                    slot_id: slot.to_string(),
                    booking_id: booking_id.to_string(),
                },
            )
            .await?;
        Ok(version)
    }

    /// Availability and bookings of a slot.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for a malformed slot id,
    /// [`ServiceError::Unavailable`] if the slot cannot be loaded.
    pub async fn get_slot(&self, slot_id: &str) -> Result<Timeslot, ServiceError> {
        let slot = SlotId::parse(slot_id)?;
        let timeslot = self.slots.state(slot.as_str(), Timeslot::clone).await?;
        Ok(timeslot)
    }

    /// Declare a participant available.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Validation`] for a bad or past slot id, a blank id or
    /// an unknown participant type; [`ServiceError::Unavailable`] when the
    /// event cannot be stored.
    pub async fn mark_available(
        &self,
        slot_id: &str,
        participant_id: &str,
        participant_type: &str,
    ) -> Result<Version, ServiceError> {
        let (slot, participant) = self.availability_input(slot_id, participant_id, participant_type)?;
        let version = self
            .slots
            .execute(
                slot.as_str(),
                SlotAction::MarkAvailable {
                    slot_id: slot.to_string(),
                    participant,
                },
            )
            .await?;
        Ok(version)
    }

    /// Withdraw a participant's availability.
    ///
    /// # Errors
    ///
    /// As for [`FlightService::mark_available`].
    pub async fn unmark_available(
        &self,
        slot_id: &str,
        participant_id: &str,
        participant_type: &str,
    ) -> Result<Version, ServiceError> {
        let (slot, participant) = self.availability_input(slot_id, participant_id, participant_type)?;
        let version = self
            .slots
            .execute(
                slot.as_str(),
                SlotAction::UnmarkAvailable {
                    slot_id: slot.to_string(),
                    participant,
                },
            )
            .await?;
        Ok(version)
    }

    /// Rows of a participant from the view, optionally filtered by status.
    pub async fn slots_by_participant(&self, participant_id: &str, status: Option<&str>) -> SlotList {
        match status {
            Some(status) => {
                self.view
                    .slots_for_participant_with_status(participant_id, status)
                    .await
            },
            None => self.view.slots_for_participant(participant_id).await,
        }
    }

    /// Current state of the saga stored under `key`.
    pub async fn saga_status(&self, key: &str) -> Option<FlightBooking> {
        self.sagas.state(|sagas| sagas.get(key).cloned()).await
    }

    fn future_slot(&self, slot_id: &str) -> Result<SlotId, ValidationError> {
        SlotId::parse_future(slot_id, self.clock.now())
    }

    fn availability_input(
        &self,
        slot_id: &str,
        participant_id: &str,
        participant_type: &str,
    ) -> Result<(SlotId, Participant), ValidationError> {
        let slot = self.future_slot(slot_id)?;
        require_non_empty("participantId", participant_id)?;
        let participant_type: ParticipantType = participant_type.parse()?;
        Ok((slot, Participant::new(participant_id, participant_type)))
    }
}
