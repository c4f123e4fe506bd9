use std::fmt;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Naive local wall-clock milliseconds since the epoch. Every timestamp in the
/// crate uses it, and no timezone is ever applied.
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;
pub const MINUTES_PER_DAY: u16 = 1440;

/// Convert a naive local datetime into `Ms`.
pub fn naive_to_ms(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

/// Convert `Ms` back into a naive local datetime. `None` if out of chrono's range.
pub fn ms_to_naive(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Half-open interval `[start, end)`.
///
/// Construction does not enforce `start < end`: a candidate booking may be
/// malformed, and it is the validator's job to reject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn from_naive(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self::new(naive_to_ms(start), naive_to_ms(end))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Adjacent spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn is_chronological(&self) -> bool {
        self.start < self.end
    }

    pub fn is_in_past(&self, now: Ms) -> bool {
        self.start < now
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Minute of the day, `0..1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct TimeOfDay(u16);

impl TryFrom<u16> for TimeOfDay {
    type Error = String;

    fn try_from(minute_of_day: u16) -> Result<Self, Self::Error> {
        Self::new(minute_of_day).ok_or_else(|| format!("minute of day {minute_of_day} out of range"))
    }
}

impl From<TimeOfDay> for u16 {
    fn from(t: TimeOfDay) -> u16 {
        t.0
    }
}

impl TimeOfDay {
    pub fn new(minute_of_day: u16) -> Option<Self> {
        (minute_of_day < MINUTES_PER_DAY).then_some(Self(minute_of_day))
    }

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour >= 24 || minute >= 60 {
            return None;
        }
        Some(Self(hour * 60 + minute))
    }

    /// Time-of-day component of a timestamp, truncated to the minute.
    pub fn of(ms: Ms) -> Self {
        match ms_to_naive(ms) {
            Some(dt) => Self::from(dt.time()),
            None => {
                let minutes = ms.div_euclid(MS_PER_MINUTE).rem_euclid(MINUTES_PER_DAY as Ms);
                Self(minutes as u16)
            }
        }
    }

    /// Parse `HH:MM`.
    pub fn parse(s: &str) -> Option<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M").ok().map(Self::from)
    }

    pub fn minute_of_day(&self) -> u16 {
        self.0
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(t: NaiveTime) -> Self {
        Self((t.hour() * 60 + t.minute()) as u16)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Recurring daily open/close time-of-day of a resource.
///
/// Only the time-of-day part of a span is compared; the calendar date is
/// ignored, so a span covering several days passes as long as its start and
/// end times of day fall inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct AvailabilityWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// Unchecked wire shape of `AvailabilityWindow`.
#[derive(Deserialize)]
struct RawWindow {
    start: TimeOfDay,
    end: TimeOfDay,
}

impl TryFrom<RawWindow> for AvailabilityWindow {
    type Error = String;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
            .ok_or_else(|| format!("window {}-{} does not open before it closes", raw.start, raw.end))
    }
}

impl AvailabilityWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// The span starts before the window opens.
    pub fn opens_after(&self, span: &Span) -> bool {
        TimeOfDay::of(span.start) < self.start
    }

    /// The span ends after the window closes.
    pub fn closes_before(&self, span: &Span) -> bool {
        TimeOfDay::of(span.end) > self.end
    }

    pub fn contains(&self, span: &Span) -> bool {
        !self.opens_after(span) && !self.closes_before(span)
    }
}

impl fmt::Display for AvailabilityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub window: AvailabilityWindow,
    /// Advisory; bumped on every accepted reservation for display ordering.
    pub last_reserved_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub reserved_at: Ms,
}

impl Reservation {
    pub fn duration_ms(&self) -> Ms {
        self.span.duration_ms()
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        insert_sorted(&mut self.reservations, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        remove_by_id(&mut self.reservations, id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

pub(crate) fn insert_sorted(list: &mut Vec<Reservation>, reservation: Reservation) {
    let pos = list.partition_point(|r| r.span.start <= reservation.span.start);
    list.insert(pos, reservation);
}

pub(crate) fn remove_by_id(list: &mut Vec<Reservation>, id: Ulid) -> Option<Reservation> {
    list.iter()
        .position(|r| r.id == id)
        .map(|pos| list.remove(pos))
}

/// Flat event records. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        window: AvailabilityWindow,
        last_reserved_at: Option<Ms>,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        window: AvailabilityWindow,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        span: Span,
        reserved_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
}
