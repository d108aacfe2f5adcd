use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Half-open interval `[start, end)` within one day, in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    start: NaiveTime,
    end: NaiveTime,
}

impl Slot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, EngineError> {
        if !is_whole_minute(start) || !is_whole_minute(end) {
            return Err(EngineError::InvalidInterval(
                "times must fall on whole minutes".into(),
            ));
        }
        if start >= end {
            return Err(EngineError::InvalidInterval(
                "End time must be after start time".into(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Parse `HH:MM` pairs, as submitted by booking forms.
    pub fn parse(start: &str, end: &str) -> Result<Self, EngineError> {
        Self::new(parse_time(start)?, parse_time(end)?)
    }

    /// Slot of `minutes` starting at `start`. Must end on the same day.
    pub fn starting_at(start: NaiveTime, minutes: i64) -> Result<Self, EngineError> {
        if minutes <= 0 || minutes >= 24 * 60 {
            return Err(EngineError::InvalidInterval(format!(
                "duration of {minutes} minutes is out of range"
            )));
        }
        let (end, wrapped) = start.overflowing_add_signed(TimeDelta::minutes(minutes));
        if wrapped != 0 {
            return Err(EngineError::InvalidInterval(
                "slot would run past midnight".into(),
            ));
        }
        Self::new(start, end)
    }

    /// For bounds derived from slots that are already valid.
    pub(crate) fn between(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &Slot) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

fn is_whole_minute(t: NaiveTime) -> bool {
    t.second() == 0 && t.nanosecond() == 0
}

fn parse_time(s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| EngineError::InvalidInterval(format!("cannot parse time {s:?}: {e}")))
}

// ── Catalog ─────────────────────────────────────────────────────

/// A bookable court.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub name: Option<String>,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub hourly_rate: Decimal,
    /// Inactive courts reject new reservations.
    pub active: bool,
}

impl Resource {
    pub fn new(id: Ulid, opening_time: NaiveTime, closing_time: NaiveTime, hourly_rate: Decimal) -> Self {
        Self {
            id,
            name: None,
            opening_time,
            closing_time,
            hourly_rate,
            active: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `[opening_time, closing_time)` as a slot.
    pub fn operating_window(&self) -> Result<Slot, EngineError> {
        Slot::new(self.opening_time, self.closing_time)
            .map_err(|_| EngineError::InvalidResource("Closing time must be after opening time"))
    }
}

// ── Reservations ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
    Completed,
}

/// Statuses that occupy time on a court.
pub const ACTIVE_STATUSES: &[ReservationStatus] =
    &[ReservationStatus::PendingPayment, ReservationStatus::Confirmed];

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::PendingPayment => "PENDING_PAYMENT",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::PendingPayment | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::Completed)
    }

    /// The lifecycle edges. Re-entering the current status is never an edge.
    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (*self, to),
            (PendingPayment, Confirmed)
                | (PendingPayment, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who the reservation is for. Passed in explicitly by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookerInfo {
    pub user_id: Ulid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl BookerInfo {
    pub fn new(user_id: Ulid, name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            phone: phone.into(),
            email: None,
            notes: None,
        }
    }
}

/// A booked interval on a court. Duration and price are derived when the
/// reservation is priced and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub(crate) id: Ulid,
    pub(crate) resource_id: Ulid,
    pub(crate) booker: BookerInfo,
    pub(crate) date: NaiveDate,
    pub(crate) slot: Slot,
    pub(crate) duration_minutes: i64,
    pub(crate) total_price: Decimal,
    /// Court rate at booking time; later moves are re-priced at this rate.
    pub(crate) hourly_rate: Decimal,
    pub(crate) status: ReservationStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) confirmed_at: Option<DateTime<Utc>>,
    pub(crate) cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn resource_id(&self) -> Ulid {
        self.resource_id
    }

    pub fn user_id(&self) -> Ulid {
        self.booker.user_id
    }

    pub fn booker(&self) -> &BookerInfo {
        &self.booker
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_minutes
    }

    pub fn duration_hours(&self) -> Decimal {
        Decimal::from(self.duration_minutes) / Decimal::from(60)
    }

    pub fn total_price(&self) -> Decimal {
        self.total_price
    }

    pub fn hourly_rate(&self) -> Decimal {
        self.hourly_rate
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// Local wall-clock start, date combined with start time.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.slot.start())
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.slot.end())
    }

    /// Move to `to`, stamping `confirmed_at`/`cancelled_at` the first time
    /// their status is entered. Illegal edges leave the reservation untouched.
    pub fn transition(&mut self, to: ReservationStatus, at: DateTime<Utc>) -> Result<(), EngineError> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        match to {
            ReservationStatus::Confirmed if self.confirmed_at.is_none() => {
                self.confirmed_at = Some(at);
            }
            ReservationStatus::Cancelled if self.cancelled_at.is_none() => {
                self.cancelled_at = Some(at);
            }
            _ => {}
        }
        self.status = to;
        Ok(())
    }
}

// ── Per-court state ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    /// Reservations of every status, bucketed by date, each bucket sorted by slot start.
    days: BTreeMap<NaiveDate, Vec<Reservation>>,
    /// Reservation id → date bucket.
    index: HashMap<Ulid, NaiveDate>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            days: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.index.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        let date = self.index.get(id)?;
        self.days.get(date)?.iter().find(|r| r.id == *id)
    }

    /// Insert or replace by id, keeping each day sorted by start.
    pub fn upsert(&mut self, reservation: Reservation) {
        self.remove(&reservation.id);
        let day = self.days.entry(reservation.date).or_default();
        let pos = day
            .binary_search_by_key(&reservation.slot.start(), |r| r.slot.start())
            .unwrap_or_else(|e| e);
        self.index.insert(reservation.id, reservation.date);
        day.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<Reservation> {
        let date = self.index.remove(id)?;
        let day = self.days.get_mut(&date)?;
        let pos = day.iter().position(|r| r.id == *id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.days.remove(&date);
        }
        Some(removed)
    }

    /// All reservations on `date`, sorted by start.
    pub fn day(&self, date: NaiveDate) -> &[Reservation] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reservations on `date` whose slot overlaps `query`, any status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, date: NaiveDate, query: &Slot) -> impl Iterator<Item = &Reservation> {
        let day = self.day(date);
        let right_bound = day.partition_point(|r| r.slot.start() < query.end());
        day[..right_bound]
            .iter()
            .filter(move |r| r.slot.end() > query.start())
    }

    /// Every reservation, chronological by (date, start).
    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.days.values().flatten()
    }
}

/// Journal record format. State changes are full snapshots, so replay is an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceSaved { resource: Resource },
    ReservationSaved { reservation: Reservation },
}

// ── Query result types ───────────────────────────────────────────

/// Outcome of an availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Conflict { reservation_id: Ulid, window: Slot },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn reason(&self) -> String {
        match self {
            Availability::Available => "Available".to_string(),
            Availability::Conflict { window, .. } => conflict_message(window),
        }
    }

    pub fn into_parts(self) -> (bool, String) {
        (self.is_available(), self.reason())
    }
}

pub(crate) fn conflict_message(window: &Slot) -> String {
    format!("Time slot conflicts with existing booking ({window})")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Available,
    Limited,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub status: DayStatus,
    pub booked_count: usize,
}

/// A booker's reservations split the way their dashboard shows them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOverview {
    pub upcoming: Vec<Reservation>,
    pub pending: Vec<Reservation>,
    pub past: Vec<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub resource_id: Ulid,
    pub pending: usize,
    pub confirmed: usize,
    /// Sum of total prices over confirmed and completed reservations.
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub resource_id: Option<Ulid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.status.is_none_or(|s| r.status == s)
            && self.resource_id.is_none_or(|id| r.resource_id == id)
            && self.date_from.is_none_or(|d| r.date >= d)
            && self.date_to.is_none_or(|d| r.date <= d)
    }
}

/// Who is cancelling decides whether the notice window applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationPolicy {
    /// Booker-initiated: refused inside the notice window as of `now`.
    Notice { now: NaiveDateTime },
    /// Operator override, no notice required.
    Immediate,
}
