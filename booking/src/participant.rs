//! Participants of a flight lesson.

use crate::slot_id::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a participant plays in a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantType {
    /// Student pilot
    Student,
    /// Aircraft being flown
    Aircraft,
    /// Flight instructor
    Instructor,
}

impl ParticipantType {
    /// Wire name (`STUDENT`, `AIRCRAFT`, `INSTRUCTOR`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Aircraft => "AIRCRAFT",
            Self::Instructor => "INSTRUCTOR",
        }
    }
}

impl fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantType {
    type Err = ValidationError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STUDENT" => Ok(Self::Student),
            "AIRCRAFT" => Ok(Self::Aircraft),
            "INSTRUCTOR" => Ok(Self::Instructor),
            _ => Err(ValidationError::ParticipantType(s.to_string())),
        }
    }
}

/// A participant identity. Identifiers are globally unique across roles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Opaque identifier
    pub id: String,
    /// Role
    pub participant_type: ParticipantType,
}

impl Participant {
    /// Create a participant.
    #[must_use]
    pub fn new(id: impl Into<String>, participant_type: ParticipantType) -> Self {
        Self {
            id: id.into(),
            participant_type,
        }
    }

    /// A student participant.
    #[must_use]
    pub fn student(id: impl Into<String>) -> Self {
        Self::new(id, ParticipantType::Student)
    }

    /// An aircraft participant.
    #[must_use]
    pub fn aircraft(id: impl Into<String>) -> Self {
        Self::new(id, ParticipantType::Aircraft)
    }

    /// An instructor participant.
    #[must_use]
    pub fn instructor(id: impl Into<String>) -> Self {
        Self::new(id, ParticipantType::Instructor)
    }
}

/// Status of one participant in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantStatus {
    /// Declared available
    #[serde(rename = "available")]
    Available,
    /// Availability withdrawn
    #[serde(rename = "not available")]
    NotAvailable,
    /// Part of a booking
    #[serde(rename = "booked")]
    Booked,
    /// Booking canceled
    #[serde(rename = "canceled")]
    Canceled,
}

impl ParticipantStatus {
    /// Status string as stored on the aggregate.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::NotAvailable => "not available",
            Self::Booked => "booked",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
