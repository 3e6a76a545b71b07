//! Slot identifiers and boundary validation.
//!
//! A slot is one hour, named `YYYY-MM-DD-HH` and read as the start of that
//! hour in UTC. Identifiers sort chronologically as plain strings.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Input rejected before it reaches an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Not of the form `YYYY-MM-DD-HH`, or not a real calendar hour.
    #[error("Invalid slotId format '{0}'. Expected 'YYYY-MM-DD-HH'.")]
    InvalidFormat(String),

    /// The slot does not start after the current time.
    #[error("Slot {0} is in the past. Only future slots can be modified.")]
    InPast(String),

    /// Unknown participant type string.
    #[error("Invalid participant type '{0}'")]
    ParticipantType(String),

    /// A required identifier was blank.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// A validated `YYYY-MM-DD-HH` slot identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotId {
    raw: String,
    starts_at: DateTime<Utc>,
}

impl SlotId {
    /// Parse a slot identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidFormat`] unless `raw` is exactly
    /// `YYYY-MM-DD-HH` and names a valid hour.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidFormat(raw.to_string());

        let shape_ok = raw.len() == 13
            && raw.char_indices().all(|(i, c)| match i {
                4 | 7 | 10 => c == '-',
                _ => c.is_ascii_digit(),
            });
        if !shape_ok {
            return Err(invalid());
        }

        let naive = NaiveDateTime::parse_from_str(&format!("{raw}:00"), "%Y-%m-%d-%H:%M")
            .map_err(|_| invalid())?;

        Ok(Self {
            raw: raw.to_string(),
            starts_at: naive.and_utc(),
        })
    }

    /// Parse a slot identifier that must start strictly after `now`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidFormat`] as for [`SlotId::parse`], or
    /// [`ValidationError::InPast`] when the slot starts at or before `now`.
    pub fn parse_future(raw: &str, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let slot = Self::parse(raw)?;
        if slot.starts_at <= now {
            return Err(ValidationError::InPast(slot.raw));
        }
        Ok(slot)
    }

    /// The identifier as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Start of the slot hour.
    #[must_use]
    pub const fn starts_at(&self) -> DateTime<Utc> {
        self.starts_at
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SlotId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SlotId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SlotId> for String {
    fn from(slot: SlotId) -> Self {
        slot.raw
    }
}

impl AsRef<str> for SlotId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Reject blank identifiers.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] naming `field` when `value` is blank.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Empty(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .expect("valid test timestamp")
    }

    #[test]
    fn parses_start_of_hour_in_utc() {
        let slot = SlotId::parse("2030-01-01-10").expect("valid slot");
        assert_eq!(slot.starts_at(), at(2030, 1, 1, 10));
        assert_eq!(slot.as_str(), "2030-01-01-10");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for raw in [
            "",
            "2030-01-01",
            "2030-01-01-1",
            "2030-01-01-100",
            "2030/01/01-10",
            "2030-13-01-10",
            "2030-02-30-10",
            "2030-01-01-24",
            "2030-01-01T10",
            "+030-01-01-10",
        ] {
            assert_eq!(
                SlotId::parse(raw),
                Err(ValidationError::InvalidFormat(raw.to_string())),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn futurity_is_strict() {
        let now = at(2030, 1, 1, 10);
        assert_eq!(
            SlotId::parse_future("2030-01-01-10", now),
            Err(ValidationError::InPast("2030-01-01-10".to_string()))
        );
        assert!(SlotId::parse_future("2030-01-01-09", now).is_err());
        assert!(SlotId::parse_future("2030-01-01-11", now).is_ok());
    }

    #[test]
    fn identifiers_sort_chronologically() {
        let mut slots: Vec<SlotId> = ["2030-02-01-00", "2029-12-31-23", "2030-01-01-10"]
            .into_iter()
            .map(|raw| SlotId::parse(raw).expect("valid slot"))
            .collect();
        slots.sort();
        let ordered: Vec<&str> = slots.iter().map(SlotId::as_str).collect();
        assert_eq!(ordered, vec!["2029-12-31-23", "2030-01-01-10", "2030-02-01-00"]);
    }

    #[test]
    fn deserializing_validates() {
        let slot: SlotId = serde_json::from_str("\"2031-06-01-14\"").expect("valid slot");
        assert_eq!(slot.to_string(), "2031-06-01-14");
        assert!(serde_json::from_str::<SlotId>("\"tomorrow\"").is_err());
    }
}
