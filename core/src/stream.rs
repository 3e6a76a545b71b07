//! Stream names and versions.
//!
//! Every aggregate instance owns one stream, named `{category}-{key}`:
//! `slot-2031-06-01-14`, `participant-slot-2031-06-01-14-alice`. The version
//! of a stream is the number of events in it; appends state the version they
//! expect so two writers cannot both extend the same stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of an event stream.
///
/// ```
/// use flightdeck_core::stream::StreamId;
///
/// let id = StreamId::for_category("slot", "2031-06-01-14");
/// assert_eq!(id.as_str(), "slot-2031-06-01-14");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Stream with exactly this name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `{category}-{key}`.
    #[must_use]
    pub fn for_category(category: &str, key: &str) -> Self {
        Self(format!("{category}-{key}"))
    }

    /// The stream name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event count of a stream. Serializes as a bare number.
///
/// ```
/// use flightdeck_core::stream::Version;
///
/// assert_eq!(Version::INITIAL.next().value(), 1);
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// An empty stream.
    pub const INITIAL: Self = Self(0);

    /// Version `value`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Number of events.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Version after one more event.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
