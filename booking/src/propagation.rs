//! Slot events to participant slot commands.
//!
//! Runs behind an [`EventConsumer`](flightdeck_runtime::EventConsumer)
//! subscribed to [`SLOT_EVENTS_TOPIC`](crate::slot::SLOT_EVENTS_TOPIC). Each
//! slot event names exactly one participant, so it maps to exactly one command
//! against that participant's aggregate. Commands carry the slot stream
//! version of their event, so a redelivered or late event cannot roll a
//! participant back to an older status.

use crate::participant_slot::{ParticipantSlotAction, ParticipantSlotRepository, participant_slot_key};
use crate::persistence::stream_version;
use crate::slot::SlotEvent;
use async_trait::async_trait;
use flightdeck_core::event::SerializedEvent;
use flightdeck_core::stream::Version;
use flightdeck_runtime::consumer::{EventHandler, HandlerError};

/// Translate a slot event stored at `source_version` into the participant
/// slot key and command it drives.
#[must_use]
pub fn translate(event: SlotEvent, source_version: Version) -> (String, ParticipantSlotAction) {
    let key = participant_slot_key(event.slot_id(), &event.participant().id);

    let command = match event {
        SlotEvent::ParticipantMarkedAvailable { slot_id, participant } => {
            ParticipantSlotAction::MarkAvailable {
                slot_id,
                participant_id: participant.id,
                participant_type: participant.participant_type,
                source_version,
            }
        },
        SlotEvent::ParticipantUnmarkedAvailable { slot_id, participant } => {
            ParticipantSlotAction::UnmarkAvailable {
                slot_id,
                participant_id: participant.id,
                participant_type: participant.participant_type,
                source_version,
            }
        },
        SlotEvent::ParticipantBooked {
            slot_id,
            participant,
            booking_id,
        } => ParticipantSlotAction::Book {
            slot_id,
            participant_id: participant.id,
            participant_type: participant.participant_type,
            booking_id,
            source_version,
        },
        SlotEvent::ParticipantCanceled {
            slot_id,
            participant,
            booking_id,
        } => ParticipantSlotAction::Cancel {
            slot_id,
            participant_id: participant.id,
            participant_type: participant.participant_type,
            booking_id,
            source_version,
        },
    };

    (key, command)
}

/// Drives participant slot aggregates from slot events.
#[derive(Clone)]
pub struct SlotToParticipantHandler {
    participants: ParticipantSlotRepository,
}

impl SlotToParticipantHandler {
    /// Handler issuing commands against `participants`.
    #[must_use]
    pub const fn new(participants: ParticipantSlotRepository) -> Self {
        Self { participants }
    }
}

#[async_trait]
impl EventHandler for SlotToParticipantHandler {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let slot_event: SlotEvent = event.decode()?;
        let source_version = stream_version(event)
            .ok_or_else(|| format!("{} carries no stream version", event.event_type))?;
        let (key, command) = translate(slot_event, source_version);

        let version = self.participants.execute(&key, command).await?;
        tracing::debug!(key, %version, event_type = %event.event_type, "Propagated slot event");
        Ok(())
    }
}
