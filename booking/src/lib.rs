//! Flight lesson booking.
//!
//! A booking pairs a student, an aircraft and an instructor in a one-hour
//! slot, after an external check says the slot is flyable.
//!
//! ```text
//! Write side:
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Booking saga │──▶│     Slot     │──▶│ booking-slot-    │
//! │  (per key)   │   │  aggregate   │   │ events           │
//! └──────┬───────┘   └──────────────┘   └────────┬─────────┘
//!        │ condition check                       │ propagation
//!        ▼                                       ▼
//! ┌──────────────┐                      ┌──────────────────┐
//! │  Weather /   │                      │ Participant slot │
//! │  minimums    │                      │ aggregates       │
//! └──────────────┘                      └────────┬─────────┘
//!                                                │ participant-slot-events
//! Read side:                                     ▼
//!                                       ┌──────────────────┐
//!                                       │ Participant slot │
//!                                       │ view             │
//!                                       └──────────────────┘
//! ```
//!
//! Slot ids are `YYYY-MM-DD-HH`, validated at the boundary
//! ([`service::FlightService`]) before anything reaches an aggregate.
//!
//! Booking consumes the three participants' availability and cancellation
//! restores it, so a participant is never available and booked at once in
//! the same slot.

pub mod app;
pub mod conditions;
pub mod config;
pub mod participant;
pub mod participant_slot;
pub mod persistence;
pub mod propagation;
pub mod saga;
pub mod server;
pub mod service;
pub mod slot;
pub mod slot_id;
pub mod view;

pub use app::{App, Dependencies, StartupError};
pub use conditions::{ConditionCheck, ConditionCheckError, ConditionsReport};
pub use config::Config;
pub use participant::{Participant, ParticipantStatus, ParticipantType};
pub use saga::{BookingRequest, BookingStage, Resolution, SagaKeying};
pub use service::{FlightService, ServiceError};
pub use slot::{SlotError, Timeslot};
pub use slot_id::{SlotId, ValidationError};
pub use view::{ParticipantSlotsView, SlotList, SlotRow};
