//! Slot aggregate: availability and bookings for one hour.
//!
//! One instance per slot identifier, stored in the `slot-{slotId}` stream.
//! A booking needs its student, aircraft and instructor to be available at the
//! same time; it is created and canceled as a whole, as three events appended
//! together.
//!
//! Booking a participant takes them out of `available`, and canceling puts
//! them back, so nobody can be booked twice through the same availability.

use crate::participant::{Participant, ParticipantStatus, ParticipantType};
use crate::persistence::{PersistenceEnvironment, persist};
use flightdeck_core::effect::Effect;
use flightdeck_core::event::Event;
use flightdeck_core::reducer::Reducer;
use flightdeck_core::stream::{StreamId, Version};
use flightdeck_core::{SmallVec, smallvec};
use flightdeck_runtime::{AggregateAction, AggregateRepository, CommandOutcome};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Stream category of slot aggregates.
pub const SLOT_CATEGORY: &str = "slot";

/// Topic carrying every committed slot event.
pub const SLOT_EVENTS_TOPIC: &str = "booking-slot-events";

/// Repository serving slot commands, keyed by slot identifier.
pub type SlotRepository = AggregateRepository<SlotReducer>;

// ============================================================================
// State
// ============================================================================

/// One participant's place in a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    /// Booked participant
    pub participant: Participant,
    /// Always `booked` while the record exists
    pub status: ParticipantStatus,
}

/// Availability and bookings of one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeslot {
    /// Participants that can be booked
    pub available: BTreeSet<Participant>,
    /// Booking id to its records, in student, aircraft, instructor order
    pub bookings: BTreeMap<String, Vec<BookingRecord>>,
    /// Number of events applied so far
    #[serde(skip)]
    pub version: Version,
}

impl Timeslot {
    /// Whether all three participants are currently available.
    #[must_use]
    pub fn is_bookable(&self, student_id: &str, aircraft_id: &str, instructor_id: &str) -> bool {
        self.available.contains(&Participant::student(student_id))
            && self.available.contains(&Participant::aircraft(aircraft_id))
            && self.available.contains(&Participant::instructor(instructor_id))
    }

    /// Records of a booking, if it exists.
    #[must_use]
    pub fn find_booking(&self, booking_id: &str) -> Option<&[BookingRecord]> {
        self.bookings.get(booking_id).map(Vec::as_slice)
    }

    fn apply(&mut self, event: &SlotEvent) {
        match event {
            SlotEvent::ParticipantMarkedAvailable { participant, .. } => {
                self.available.insert(participant.clone());
            },
            SlotEvent::ParticipantUnmarkedAvailable { participant, .. } => {
                self.available.remove(participant);
            },
            SlotEvent::ParticipantBooked {
                participant,
                booking_id,
                ..
            } => {
                self.available.remove(participant);
                self.bookings
                    .entry(booking_id.clone())
                    .or_default()
                    .push(BookingRecord {
                        participant: participant.clone(),
                        status: ParticipantStatus::Booked,
                    });
            },
            SlotEvent::ParticipantCanceled {
                participant,
                booking_id,
                ..
            } => {
                if let Some(records) = self.bookings.get_mut(booking_id) {
                    records.retain(|record| &record.participant != participant);
                    if records.is_empty() {
                        self.bookings.remove(booking_id);
                    }
                }
                self.available.insert(participant.clone());
            },
        }
        self.version = self.version.next();
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events raised by the slot aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotEvent {
    /// A participant declared availability.
    ParticipantMarkedAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant
        participant: Participant,
    },
    /// A participant withdrew availability.
    ParticipantUnmarkedAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant
        participant: Participant,
    },
    /// A participant became part of a booking.
    ParticipantBooked {
        /// Slot identifier
        slot_id: String,
        /// Participant
        participant: Participant,
        /// Booking the participant belongs to
        booking_id: String,
    },
    /// A participant's booking was canceled.
    ParticipantCanceled {
        /// Slot identifier
        slot_id: String,
        /// Participant
        participant: Participant,
        /// Canceled booking
        booking_id: String,
    },
}

impl SlotEvent {
    /// Slot the event belongs to.
    #[must_use]
    pub fn slot_id(&self) -> &str {
        match self {
            Self::ParticipantMarkedAvailable { slot_id, .. }
            | Self::ParticipantUnmarkedAvailable { slot_id, .. }
            | Self::ParticipantBooked { slot_id, .. }
            | Self::ParticipantCanceled { slot_id, .. } => slot_id,
        }
    }

    /// Participant the event is about.
    #[must_use]
    pub const fn participant(&self) -> &Participant {
        match self {
            Self::ParticipantMarkedAvailable { participant, .. }
            | Self::ParticipantUnmarkedAvailable { participant, .. }
            | Self::ParticipantBooked { participant, .. }
            | Self::ParticipantCanceled { participant, .. } => participant,
        }
    }
}

impl Event for SlotEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ParticipantMarkedAvailable { .. } => "ParticipantMarkedAvailable.v1",
            Self::ParticipantUnmarkedAvailable { .. } => "ParticipantUnmarkedAvailable.v1",
            Self::ParticipantBooked { .. } => "ParticipantBooked.v1",
            Self::ParticipantCanceled { .. } => "ParticipantCanceled.v1",
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Domain rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// Not all three participants are available.
    #[error("Slot {slot_id} is not bookable. Not all participants are available.")]
    NotBookable {
        /// Slot identifier
        slot_id: String,
    },

    /// No booking with this id exists in the slot.
    #[error("No booking {booking_id} to cancel in slot {slot_id}")]
    BookingNotFound {
        /// Slot identifier
        slot_id: String,
        /// Unknown booking id
        booking_id: String,
    },

    /// The booking id is already taken in this slot.
    #[error("Booking {booking_id} already exists in slot {slot_id}")]
    DuplicateBooking {
        /// Slot identifier
        slot_id: String,
        /// Reused booking id
        booking_id: String,
    },
}

/// Commands, replayed events and command outcomes of the slot aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotAction {
    // Commands
    /// Declare a participant available.
    MarkAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant
        participant: Participant,
    },
    /// Withdraw a participant's availability.
    UnmarkAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant
        participant: Participant,
    },
    /// Book a student, aircraft and instructor together.
    BookReservation {
        /// Slot identifier
        slot_id: String,
        /// Student id
        student_id: String,
        /// Aircraft id
        aircraft_id: String,
        /// Instructor id
        instructor_id: String,
        /// Caller-chosen booking id, unique within the slot
        booking_id: String,
    },
    /// Cancel a whole booking.
    CancelBooking {
        /// Slot identifier
        slot_id: String,
        /// Booking to cancel
        booking_id: String,
    },

    // Events
    /// A stored event being replayed.
    Applied(SlotEvent),

    // Outcomes
    /// The command's events were stored.
    Committed {
        /// Stream version after the append
        version: Version,
    },
    /// The command broke a rule; nothing was stored.
    Rejected(SlotError),
    /// Storing the events failed.
    PersistFailed(String),
}

impl AggregateAction for SlotAction {
    type Event = SlotEvent;
    type Rejection = SlotError;

    fn from_event(event: SlotEvent) -> Self {
        Self::Applied(event)
    }

    fn outcome(&self) -> Option<CommandOutcome<SlotError>> {
        match self {
            Self::Committed { version } => Some(CommandOutcome::Committed { version: *version }),
            Self::Rejected(error) => Some(CommandOutcome::Rejected(error.clone())),
            Self::PersistFailed(reason) => Some(CommandOutcome::Failed(reason.clone())),
            _ => None,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer of the slot aggregate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotReducer;

impl SlotReducer {
    fn validate_booking(
        state: &Timeslot,
        slot_id: &str,
        student_id: &str,
        aircraft_id: &str,
        instructor_id: &str,
        booking_id: &str,
    ) -> Result<(), SlotError> {
        if state.bookings.contains_key(booking_id) {
            return Err(SlotError::DuplicateBooking {
                slot_id: slot_id.to_string(),
                booking_id: booking_id.to_string(),
            });
        }
        if !state.is_bookable(student_id, aircraft_id, instructor_id) {
            return Err(SlotError::NotBookable {
                slot_id: slot_id.to_string(),
            });
        }
        Ok(())
    }

    fn commit(
        state: &mut Timeslot,
        slot_id: &str,
        events: Vec<SlotEvent>,
        env: &PersistenceEnvironment,
    ) -> SmallVec<[Effect<SlotAction>; 4]> {
        let expected = state.version;
        for event in &events {
            state.apply(event);
        }

        smallvec![persist(
            env,
            StreamId::for_category(SLOT_CATEGORY, slot_id),
            expected,
            SLOT_EVENTS_TOPIC,
            events,
            |result| match result {
                Ok(version) => SlotAction::Committed { version },
                Err(reason) => SlotAction::PersistFailed(reason),
            },
        )]
    }

    fn reject(error: SlotError) -> SmallVec<[Effect<SlotAction>; 4]> {
        tracing::info!(%error, "Slot command rejected");
        smallvec![Effect::send(SlotAction::Rejected(error))]
    }
}

impl Reducer for SlotReducer {
    type State = Timeslot;
    type Action = SlotAction;
    type Environment = PersistenceEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SlotAction::MarkAvailable {
                slot_id,
                participant,
            } => {
                let event = SlotEvent::ParticipantMarkedAvailable {
                    slot_id: slot_id.clone(),
                    participant,
                };
                Self::commit(state, &slot_id, vec![event], env)
            },

            SlotAction::UnmarkAvailable {
                slot_id,
                participant,
            } => {
                let event = SlotEvent::ParticipantUnmarkedAvailable {
                    slot_id: slot_id.clone(),
                    participant,
                };
                Self::commit(state, &slot_id, vec![event], env)
            },

            SlotAction::BookReservation {
                slot_id,
                student_id,
                aircraft_id,
                instructor_id,
                booking_id,
            } => {
                if let Err(error) = Self::validate_booking(
                    state,
                    &slot_id,
                    &student_id,
                    &aircraft_id,
                    &instructor_id,
                    &booking_id,
                ) {
                    return Self::reject(error);
                }

                let events = [
                    (student_id, ParticipantType::Student),
                    (aircraft_id, ParticipantType::Aircraft),
                    (instructor_id, ParticipantType::Instructor),
                ]
                .into_iter()
                .map(|(id, participant_type)| SlotEvent::ParticipantBooked {
                    slot_id: slot_id.clone(),
                    participant: Participant::new(id, participant_type),
                    booking_id: booking_id.clone(),
                })
                .collect();

                tracing::info!(slot_id = %slot_id, booking_id = %booking_id, "Booking reservation");
                Self::commit(state, &slot_id, events, env)
            },

            SlotAction::CancelBooking {
                slot_id,
                booking_id,
            } => {
                let Some(records) = state.find_booking(&booking_id) else {
                    return Self::reject(SlotError::BookingNotFound {
                        slot_id,
                        booking_id,
                    });
                };

                let events = records
                    .iter()
                    .map(|record| SlotEvent::ParticipantCanceled {
                        slot_id: slot_id.clone(),
                        participant: record.participant.clone(),
                        booking_id: booking_id.clone(),
                    })
                    .collect();

                tracing::info!(slot_id = %slot_id, booking_id = %booking_id, "Canceling booking");
                Self::commit(state, &slot_id, events, env)
            },

            SlotAction::Applied(event) => {
                state.apply(&event);
                SmallVec::new()
            },

            SlotAction::Committed { .. } | SlotAction::Rejected(_) | SlotAction::PersistFailed(_) => {
                SmallVec::new()
            },
        }
    }
}
