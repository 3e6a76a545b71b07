//! Materialized view of participant slots.
//!
//! One row per `(slotId, participantId)`, overwritten by every participant
//! slot event that is newer than the one the row was built from. The view is
//! fed by its own consumer and lags the aggregates.

use crate::participant::ParticipantStatus;
use crate::participant_slot::ParticipantSlotEvent;
use async_trait::async_trait;
use flightdeck_core::event::SerializedEvent;
use flightdeck_core::projection::{Projection, Result};
use flightdeck_core::stream::Version;
use flightdeck_runtime::consumer::{EventHandler, HandlerError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name the view reports in logs.
pub const VIEW_NAME: &str = "view-participant-slots";

/// Status string of a canceled row. The view spells it with two l's.
pub const CANCELLED: &str = "cancelled";

/// One row of the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRow {
    /// Slot identifier
    pub slot_id: String,
    /// Participant id
    pub participant_id: String,
    /// `STUDENT`, `AIRCRAFT` or `INSTRUCTOR`
    pub participant_type: String,
    /// Booking id, empty unless booked or cancelled
    pub booking_id: String,
    /// `available`, `not available`, `booked` or `cancelled`
    pub status: String,
}

impl SlotRow {
    /// Row computed from the event payload alone.
    #[must_use]
    pub fn from_event(event: &ParticipantSlotEvent) -> Self {
        let state = event.to_state();
        let status = match state.status {
            ParticipantStatus::Canceled => CANCELLED,
            other => other.as_str(),
        };

        Self {
            slot_id: state.slot_id,
            participant_id: state.participant_id,
            participant_type: state.participant_type.as_str().to_string(),
            booking_id: event.booking_id().unwrap_or_default().to_string(),
            status: status.to_string(),
        }
    }
}

/// Query result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotList {
    /// Matching rows ordered by slot id
    pub slots: Vec<SlotRow>,
}

#[derive(Debug)]
struct Entry {
    row: SlotRow,
    source_version: Version,
}

/// In-memory participant slot rows.
#[derive(Debug, Default)]
pub struct ParticipantSlotsView {
    rows: RwLock<HashMap<(String, String), Entry>>,
}

impl ParticipantSlotsView {
    /// Empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of `participant_id`.
    pub async fn slots_for_participant(&self, participant_id: &str) -> SlotList {
        self.select(|row| row.participant_id == participant_id).await
    }

    /// Rows of `participant_id` whose status equals `status`.
    pub async fn slots_for_participant_with_status(
        &self,
        participant_id: &str,
        status: &str,
    ) -> SlotList {
        self.select(|row| row.participant_id == participant_id && row.status == status)
            .await
    }

    /// The row of one participant in one slot.
    pub async fn row(&self, slot_id: &str, participant_id: &str) -> Option<SlotRow> {
        self.rows
            .read()
            .await
            .get(&(slot_id.to_string(), participant_id.to_string()))
            .map(|entry| entry.row.clone())
    }

    /// Number of rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the view holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    async fn select(&self, predicate: impl Fn(&SlotRow) -> bool) -> SlotList {
        let rows = self.rows.read().await;
        let mut slots: Vec<SlotRow> = rows
            .values()
            .map(|entry| &entry.row)
            .filter(|row| predicate(row))
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        SlotList { slots }
    }
}

impl Projection for ParticipantSlotsView {
    type Event = ParticipantSlotEvent;

    fn name(&self) -> &str {
        VIEW_NAME
    }

    async fn apply_event(&self, event: &Self::Event) -> Result<()> {
        let row = SlotRow::from_event(event);
        let key = (row.slot_id.clone(), row.participant_id.clone());
        let source_version = event.source_version();

        let mut rows = self.rows.write().await;
        if rows
            .get(&key)
            .is_some_and(|entry| entry.source_version >= source_version)
        {
            tracing::debug!(
                slot_id = %key.0,
                participant_id = %key.1,
                %source_version,
                "Row already newer than event, skipping"
            );
            return Ok(());
        }

        rows.insert(key, Entry { row, source_version });
        Ok(())
    }
}

/// Feeds participant slot events from the bus into the view.
#[derive(Clone)]
pub struct ViewUpdater {
    view: Arc<ParticipantSlotsView>,
}

impl ViewUpdater {
    /// Updater writing into `view`.
    #[must_use]
    pub const fn new(view: Arc<ParticipantSlotsView>) -> Self {
        Self { view }
    }
}

#[async_trait]
impl EventHandler for ViewUpdater {
    async fn handle(&self, event: &SerializedEvent) -> std::result::Result<(), HandlerError> {
        let participant_event: ParticipantSlotEvent = event.decode()?;
        self.view.apply_event(&participant_event).await?;
        tracing::trace!(view = self.view.name(), event_type = %event.event_type, "Row updated");
        Ok(())
    }
}
