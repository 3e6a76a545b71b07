//! Participant slot aggregate: the status of one participant in one slot.
//!
//! Every event here is a translation of a slot event; the aggregate never
//! decides anything on its own. Each event overwrites the whole state and
//! remembers the slot stream version it came from; a command derived from an
//! older or the same slot event is acknowledged without a new event.

use crate::participant::{ParticipantStatus, ParticipantType};
use crate::persistence::{PersistenceEnvironment, persist};
use flightdeck_core::effect::Effect;
use flightdeck_core::event::Event;
use flightdeck_core::reducer::Reducer;
use flightdeck_core::stream::{StreamId, Version};
use flightdeck_core::{SmallVec, smallvec};
use flightdeck_runtime::{AggregateAction, AggregateRepository, CommandOutcome};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Stream category of participant slot aggregates.
pub const PARTICIPANT_SLOT_CATEGORY: &str = "participant-slot";

/// Topic carrying every committed participant slot event.
pub const PARTICIPANT_SLOT_EVENTS_TOPIC: &str = "participant-slot-events";

/// Repository serving participant slot commands.
pub type ParticipantSlotRepository = AggregateRepository<ParticipantSlotReducer>;

/// Aggregate key of a participant in a slot.
///
/// The participant type is left out: participant ids are unique across roles.
#[must_use]
pub fn participant_slot_key(slot_id: &str, participant_id: &str) -> String {
    format!("{slot_id}-{participant_id}")
}

/// Current status of the participant in the slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSlotState {
    /// Slot identifier
    pub slot_id: String,
    /// Participant id
    pub participant_id: String,
    /// Participant role
    pub participant_type: ParticipantType,
    /// Last status assigned by an event
    pub status: ParticipantStatus,
}

/// Aggregate state; `None` until the first event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSlot {
    /// Current status
    pub current: Option<ParticipantSlotState>,
    /// Number of events applied so far
    pub version: Version,
    /// Newest slot event reflected in `current`
    pub source_version: Version,
}

/// Events of the participant slot aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantSlotEvent {
    /// The participant is available in the slot.
    MarkedAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
    /// The participant withdrew availability.
    UnmarkedAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
    /// The participant was booked.
    Booked {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Booking id
        booking_id: String,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
    /// The participant's booking was canceled.
    Canceled {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Booking id
        booking_id: String,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
}

impl ParticipantSlotEvent {
    /// The state this event leaves behind.
    #[must_use]
    pub fn to_state(&self) -> ParticipantSlotState {
        let (slot_id, participant_id, participant_type, status) = match self {
            Self::MarkedAvailable {
                slot_id,
                participant_id,
                participant_type,
                ..
            } => (slot_id, participant_id, participant_type, ParticipantStatus::Available),
            Self::UnmarkedAvailable {
                slot_id,
                participant_id,
                participant_type,
                ..
            } => (slot_id, participant_id, participant_type, ParticipantStatus::NotAvailable),
            Self::Booked {
                slot_id,
                participant_id,
                participant_type,
                ..
            } => (slot_id, participant_id, participant_type, ParticipantStatus::Booked),
            Self::Canceled {
                slot_id,
                participant_id,
                participant_type,
                ..
            } => (slot_id, participant_id, participant_type, ParticipantStatus::Canceled),
        };

        ParticipantSlotState {
            slot_id: slot_id.clone(),
            participant_id: participant_id.clone(),
            participant_type: *participant_type,
            status,
        }
    }

    /// Version of the slot event this event was derived from.
    #[must_use]
    pub const fn source_version(&self) -> Version {
        match self {
            Self::MarkedAvailable { source_version, .. }
            | Self::UnmarkedAvailable { source_version, .. }
            | Self::Booked { source_version, .. }
            | Self::Canceled { source_version, .. } => *source_version,
        }
    }

    /// Booking id for booked and canceled events.
    #[must_use]
    pub fn booking_id(&self) -> Option<&str> {
        match self {
            Self::Booked { booking_id, .. } | Self::Canceled { booking_id, .. } => Some(booking_id),
            Self::MarkedAvailable { .. } | Self::UnmarkedAvailable { .. } => None,
        }
    }
}

impl Event for ParticipantSlotEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::MarkedAvailable { .. } => "MarkedAvailable.v1",
            Self::UnmarkedAvailable { .. } => "UnmarkedAvailable.v1",
            Self::Booked { .. } => "ParticipantSlotBooked.v1",
            Self::Canceled { .. } => "ParticipantSlotCanceled.v1",
        }
    }
}

/// Commands, replayed events and outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantSlotAction {
    // Commands
    /// Record that the participant is available.
    MarkAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
    /// Record that the participant withdrew availability.
    UnmarkAvailable {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
    /// Record that the participant was booked.
    Book {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Booking id
        booking_id: String,
        /// Version of the slot event this was derived from
        source_version: Version,
    },
    /// Record that the participant's booking was canceled.
    Cancel {
        /// Slot identifier
        slot_id: String,
        /// Participant id
        participant_id: String,
        /// Participant role
        participant_type: ParticipantType,
        /// Booking id
        booking_id: String,
        /// Version of the slot event this was derived from
        source_version: Version,
    },

    // Events
    /// A stored event being replayed.
    Applied(ParticipantSlotEvent),

    // Outcomes
    /// The event was stored.
    Committed {
        /// Stream version after the append
        version: Version,
    },
    /// Storing the event failed.
    PersistFailed(String),
}

impl ParticipantSlotAction {
    /// The event a command translates to; `None` for other actions.
    #[must_use]
    pub fn into_event(self) -> Option<ParticipantSlotEvent> {
        match self {
            Self::MarkAvailable {
                slot_id,
                participant_id,
                participant_type,
                source_version,
            } => Some(ParticipantSlotEvent::MarkedAvailable {
                slot_id,
                participant_id,
                participant_type,
                source_version,
            }),
            Self::UnmarkAvailable {
                slot_id,
                participant_id,
                participant_type,
                source_version,
            } => Some(ParticipantSlotEvent::UnmarkedAvailable {
                slot_id,
                participant_id,
                participant_type,
                source_version,
            }),
            Self::Book {
                slot_id,
                participant_id,
                participant_type,
                booking_id,
                source_version,
            } => Some(ParticipantSlotEvent::Booked {
                slot_id,
                participant_id,
                participant_type,
                booking_id,
                source_version,
            }),
            Self::Cancel {
                slot_id,
                participant_id,
                participant_type,
                booking_id,
                source_version,
            } => Some(ParticipantSlotEvent::Canceled {
                slot_id,
                participant_id,
                participant_type,
                booking_id,
                source_version,
            }),
            Self::Applied(_) | Self::Committed { .. } | Self::PersistFailed(_) => None,
        }
    }
}

impl AggregateAction for ParticipantSlotAction {
    type Event = ParticipantSlotEvent;
    type Rejection = Infallible;

    fn from_event(event: ParticipantSlotEvent) -> Self {
        Self::Applied(event)
    }

    fn outcome(&self) -> Option<CommandOutcome<Infallible>> {
        match self {
            Self::Committed { version } => Some(CommandOutcome::Committed { version: *version }),
            Self::PersistFailed(reason) => Some(CommandOutcome::Failed(reason.clone())),
            _ => None,
        }
    }
}

/// Reducer of the participant slot aggregate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParticipantSlotReducer;

impl Reducer for ParticipantSlotReducer {
    type State = ParticipantSlot;
    type Action = ParticipantSlotAction;
    type Environment = PersistenceEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ParticipantSlotAction::Applied(event) => {
                state.current = Some(event.to_state());
                state.version = state.version.next();
                state.source_version = event.source_version();
                SmallVec::new()
            },
            ParticipantSlotAction::Committed { .. } | ParticipantSlotAction::PersistFailed(_) => {
                SmallVec::new()
            },
            command => {
                let Some(event) = command.into_event() else {
                    return SmallVec::new();
                };
                let current = event.to_state();
                let key = participant_slot_key(&current.slot_id, &current.participant_id);

                // Redelivered or overtaken slot events must not roll the status back.
                if event.source_version() <= state.source_version {
                    tracing::debug!(
                        key,
                        source_version = %event.source_version(),
                        applied = %state.source_version,
                        "Slot event already reflected, skipping"
                    );
                    return smallvec![Effect::send(ParticipantSlotAction::Committed {
                        version: state.version,
                    })];
                }

                let expected = state.version;
                state.current = Some(current);
                state.version = state.version.next();
                state.source_version = event.source_version();

                smallvec![persist(
                    env,
                    StreamId::for_category(PARTICIPANT_SLOT_CATEGORY, &key),
                    expected,
                    PARTICIPANT_SLOT_EVENTS_TOPIC,
                    vec![event],
                    |result| match result {
                        Ok(version) => ParticipantSlotAction::Committed { version },
                        Err(reason) => ParticipantSlotAction::PersistFailed(reason),
                    },
                )]
            },
        }
    }
}
