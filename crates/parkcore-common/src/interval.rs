// Half-open time-window arithmetic shared by the availability service and
// the realtime hub's emission filter. Minutes-since-midnight avoids
// timezone hazards when comparing subscription windows against events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `[start, end)` window expressed in minutes since midnight.
///
/// `end == other.start` is not an overlap — see [`overlaps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_minutes: u16,
    pub end_minutes: u16,
}

impl TimeWindow {
    pub fn new(start_minutes: u16, end_minutes: u16) -> Self {
        Self { start_minutes, end_minutes }
    }

    /// Parse an `HH:MM` string into minutes since midnight.
    pub fn parse_hhmm(value: &str) -> Result<u16, ParseTimeError> {
        let (hours, minutes) = value.split_once(':').ok_or(ParseTimeError(value.to_string()))?;
        let hours: u16 = hours.parse().map_err(|_| ParseTimeError(value.to_string()))?;
        let minutes: u16 = minutes.parse().map_err(|_| ParseTimeError(value.to_string()))?;
        if hours >= 24 || minutes >= 60 {
            return Err(ParseTimeError(value.to_string()));
        }
        Ok(hours * 60 + minutes)
    }

    pub fn from_hhmm(start: &str, end: &str) -> Result<Self, ParseTimeError> {
        Ok(Self::new(Self::parse_hhmm(start)?, Self::parse_hhmm(end)?))
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        overlaps(self.start_minutes, self.end_minutes, other.start_minutes, other.end_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid HH:MM time value: `{}`", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

/// Half-open interval overlap predicate: `A.start < B.end ∧ A.end > B.start`.
pub fn overlaps(a_start: u16, a_end: u16, b_start: u16, b_end: u16) -> bool {
    a_start < b_end && a_end > b_start
}

/// Minutes since midnight for an `hour`/`minute` pair, as sent over the wire
/// by `book_spot` events.
pub fn minutes_since_midnight(hour: u8, minute: u8) -> u16 {
    u16::from(hour) * 60 + u16::from(minute)
}
