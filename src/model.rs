use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds, used for durations only.
pub type Ms = i64;

/// An absolute instant, kept with the UTC offset the client wrote it in.
/// Ordering and equality compare the instant, not the offset.
pub type Timestamp = DateTime<FixedOffset>;

/// A timestamp as it arrived from a client, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInput {
    /// Carries an explicit offset (`Z`, `+02:00`, ...).
    Aware(Timestamp),
    /// Wall-clock time with no offset; ambiguous as an instant.
    Naive(NaiveDateTime),
}

impl TimeInput {
    pub fn aware(&self) -> Option<Timestamp> {
        match self {
            TimeInput::Aware(ts) => Some(*ts),
            TimeInput::Naive(_) => None,
        }
    }
}

impl From<Timestamp> for TimeInput {
    fn from(ts: Timestamp) -> Self {
        TimeInput::Aware(ts)
    }
}

impl From<DateTime<Utc>> for TimeInput {
    fn from(ts: DateTime<Utc>) -> Self {
        TimeInput::Aware(ts.into())
    }
}

impl From<NaiveDateTime> for TimeInput {
    fn from(ts: NaiveDateTime) -> Self {
        TimeInput::Naive(ts)
    }
}

impl FromStr for TimeInput {
    type Err = chrono::ParseError;

    /// Accepts RFC 3339 (`T` or space separator, `Z` or `±HH[:MM]` offset).
    /// The same shapes without an offset parse as `Naive`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let normalized = if s.len() > 10 && s.as_bytes()[10] == b' ' {
            format!("{}T{}", &s[..10], &s[11..])
        } else {
            s.to_string()
        };
        if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
            return Ok(TimeInput::Aware(ts));
        }
        if let Ok(ts) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%#z") {
            return Ok(TimeInput::Aware(ts));
        }
        NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f").map(TimeInput::Naive)
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        (self.end - self.start).num_milliseconds()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A booked room for a time range. Never mutated after admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: String,
    /// Active reservations, sorted by `start_time`. Never overlapping.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room_id: String) -> Self {
        Self {
            room_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start_time.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.start_time <= reservation.start_time);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose span intersects the query window.
    /// Everything at or past the partition point starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.start_time < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.end_time > query.start)
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: Ulid,
        room_id: String,
        start_time: Timestamp,
        end_time: Timestamp,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: String,
    },
}

impl Event {
    pub fn room_id(&self) -> &str {
        match self {
            Event::ReservationCreated { room_id, .. } | Event::ReservationCancelled { room_id, .. } => {
                room_id
            }
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: String,
    pub reservation_count: usize,
}
