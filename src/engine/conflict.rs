use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use rust_decimal::{Decimal, RoundingStrategy};
use ulid::Ulid;

use crate::model::*;

use super::{EngineError, HoursBound};

/// Prices are kept to the currency's minor unit.
pub const PRICE_SCALE: u32 = 2;

/// Bookers may cancel only while the start is strictly more than this far away.
pub const CANCELLATION_NOTICE_SECS: i64 = 86_400;

pub(crate) fn validate_resource(resource: &Resource) -> Result<(), EngineError> {
    use crate::limits::*;
    resource.operating_window()?;
    if resource.hourly_rate < Decimal::ZERO {
        return Err(EngineError::InvalidResource("hourly rate must not be negative"));
    }
    // the longest bookable slot has to price without overflow
    compute_duration_and_price(resource, &resource.operating_window()?)?;
    if let Some(ref n) = resource.name
        && n.len() > MAX_RESOURCE_NAME_LEN {
            return Err(EngineError::LimitExceeded("court name too long"));
        }
    Ok(())
}

pub(crate) fn validate_booker(booker: &BookerInfo) -> Result<(), EngineError> {
    use crate::limits::*;
    if booker.name.len() > MAX_BOOKER_NAME_LEN {
        return Err(EngineError::LimitExceeded("booker name too long"));
    }
    if booker.phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone number too long"));
    }
    if booker.email.as_ref().is_some_and(|e| e.len() > MAX_EMAIL_LEN) {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if booker.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

pub fn check_operating_hours(resource: &Resource, slot: &Slot) -> Result<(), EngineError> {
    if slot.start() < resource.opening_time {
        return Err(EngineError::OperatingHours {
            bound: HoursBound::Opening,
            limit: resource.opening_time,
        });
    }
    if slot.end() > resource.closing_time {
        return Err(EngineError::OperatingHours {
            bound: HoursBound::Closing,
            limit: resource.closing_time,
        });
    }
    Ok(())
}

/// `(duration_hours, total_price)`. Both exact in decimal; the price is
/// rounded half-up to `PRICE_SCALE` places after the multiplication.
pub fn compute_duration_and_price(resource: &Resource, slot: &Slot) -> Result<(Decimal, Decimal), EngineError> {
    price_at_rate(resource.hourly_rate, slot)
}

pub(crate) fn price_at_rate(hourly_rate: Decimal, slot: &Slot) -> Result<(Decimal, Decimal), EngineError> {
    let minutes = Decimal::from(slot.duration_minutes());
    let sixty = Decimal::from(60);
    let hours = minutes / sixty;
    let price = minutes
        .checked_mul(hourly_rate)
        .and_then(|cost| cost.checked_div(sixty))
        .ok_or(EngineError::InvalidResource("hourly rate too large to price"))?
        .round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    Ok((hours, price))
}

/// Active reservations on `date` overlapping `slot`, in start order, minus `exclude_id`.
pub(crate) fn active_overlaps<'a>(
    rs: &'a ResourceState,
    date: NaiveDate,
    slot: &'a Slot,
    exclude_id: Option<Ulid>,
) -> impl Iterator<Item = &'a Reservation> {
    rs.overlapping(date, slot)
        .filter(move |r| r.is_active() && Some(r.id()) != exclude_id)
}

/// Commit-time backstop: the caller holds the court's write lock.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    date: NaiveDate,
    slot: &Slot,
    exclude_id: Option<Ulid>,
) -> Result<(), EngineError> {
    match active_overlaps(rs, date, slot, exclude_id).next() {
        Some(existing) => Err(EngineError::Conflict {
            reservation_id: existing.id(),
            window: existing.slot(),
        }),
        None => Ok(()),
    }
}

/// Verdict from an already-filtered overlap set. Reports the earliest-starting hit.
pub(crate) fn verdict(overlapping: &[Reservation]) -> Availability {
    match overlapping.iter().min_by_key(|r| r.slot().start()) {
        Some(r) => Availability::Conflict {
            reservation_id: r.id(),
            window: r.slot(),
        },
        None => Availability::Available,
    }
}

/// `now` is local wall-clock time, already normalized by the caller.
pub fn can_cancel(reservation: &Reservation, now: NaiveDateTime) -> bool {
    if !reservation.is_active() {
        return false;
    }
    reservation.starts_at() - now > TimeDelta::seconds(CANCELLATION_NOTICE_SECS)
}
