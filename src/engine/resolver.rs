//! Booking admission: interval, operating hours, overlap, price, commit.
//!
//! Generic over the catalog and store traits; [`Engine`](super::Engine)
//! implements both. [`create_reservation`] runs every phase. Multi-step
//! flows that already checked a slot earlier in the same request hold a
//! [`CheckedBooking`] and finish with [`create_reservation_presumed_valid`];
//! the store's `save` re-checks overlap either way.

use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_operating_hours, compute_duration_and_price, validate_booker, verdict};
use super::{EngineError, ReservationStore, ResourceCatalog};

/// Which checks a [`CheckedBooking`] has passed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationPhase {
    /// Interval is well formed, court exists and is active, slot is within hours.
    OperatingHours,
    /// No active reservation overlaps the slot as of the check.
    Availability,
}

/// Raw booking input, before any validation.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub booker: BookerInfo,
}

impl BookingRequest {
    pub fn new(resource_id: Ulid, date: NaiveDate, slot: Slot, booker: BookerInfo) -> Self {
        Self {
            resource_id,
            date,
            start: slot.start(),
            end: slot.end(),
            booker,
        }
    }
}

/// A request whose fields have been validated, with its price already derived.
/// Only the resolver constructs these.
#[derive(Debug, Clone)]
pub struct CheckedBooking {
    resource: Resource,
    date: NaiveDate,
    slot: Slot,
    booker: BookerInfo,
    duration_hours: Decimal,
    total_price: Decimal,
    phase: ValidationPhase,
}

impl CheckedBooking {
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn duration_hours(&self) -> Decimal {
        self.duration_hours
    }

    pub fn total_price(&self) -> Decimal {
        self.total_price
    }

    pub fn phase(&self) -> ValidationPhase {
        self.phase
    }
}

pub async fn check_availability<S: ReservationStore + ?Sized>(
    store: &S,
    resource: &Resource,
    date: NaiveDate,
    slot: &Slot,
    exclude_id: Option<Ulid>,
) -> Result<Availability, EngineError> {
    if !resource.active {
        return Err(EngineError::ResourceInactive(resource.id));
    }
    let overlapping = store
        .find_overlapping(resource.id, date, *slot, exclude_id, ACTIVE_STATUSES)
        .await?;
    Ok(verdict(&overlapping))
}

/// Interval, court and operating-hours checks, plus pricing.
pub async fn validate_request<C: ResourceCatalog + ?Sized>(
    catalog: &C,
    request: BookingRequest,
) -> Result<CheckedBooking, EngineError> {
    let slot = Slot::new(request.start, request.end)?;
    validate_booker(&request.booker)?;
    let resource = catalog.get_resource(request.resource_id).await?;
    if !resource.active {
        return Err(EngineError::ResourceInactive(resource.id));
    }
    check_operating_hours(&resource, &slot)?;
    let (duration_hours, total_price) = compute_duration_and_price(&resource, &slot)?;
    Ok(CheckedBooking {
        resource,
        date: request.date,
        slot,
        booker: request.booker,
        duration_hours,
        total_price,
        phase: ValidationPhase::OperatingHours,
    })
}

/// Advance a booking to [`ValidationPhase::Availability`], or fail with the conflict.
pub async fn confirm_slot_free<S: ReservationStore + ?Sized>(
    store: &S,
    mut checked: CheckedBooking,
) -> Result<CheckedBooking, EngineError> {
    match check_availability(store, &checked.resource, checked.date, &checked.slot, None).await? {
        Availability::Available => {
            checked.phase = ValidationPhase::Availability;
            Ok(checked)
        }
        Availability::Conflict { reservation_id, window } => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL, "phase" => "check").increment(1);
            debug!(
                "slot {} on {} conflicts with {reservation_id} on court {}",
                checked.slot, checked.date, checked.resource.id
            );
            Err(EngineError::Conflict { reservation_id, window })
        }
    }
}

pub async fn create_reservation<C, S>(
    catalog: &C,
    store: &S,
    request: BookingRequest,
) -> Result<Reservation, EngineError>
where
    C: ResourceCatalog + ?Sized,
    S: ReservationStore + ?Sized,
{
    let checked = validate_request(catalog, request).await?;
    let checked = confirm_slot_free(store, checked).await?;
    persist_pending(store, checked).await
}

/// Persist a booking whose availability was checked earlier in the same flow.
/// Anything short of [`ValidationPhase::Availability`] is refused.
pub async fn create_reservation_presumed_valid<S: ReservationStore + ?Sized>(
    store: &S,
    checked: CheckedBooking,
) -> Result<Reservation, EngineError> {
    if checked.phase < ValidationPhase::Availability {
        return Err(EngineError::Unvalidated(checked.phase));
    }
    persist_pending(store, checked).await
}

async fn persist_pending<S: ReservationStore + ?Sized>(
    store: &S,
    checked: CheckedBooking,
) -> Result<Reservation, EngineError> {
    let reservation = Reservation {
        id: Ulid::new(),
        resource_id: checked.resource.id,
        booker: checked.booker,
        date: checked.date,
        slot: checked.slot,
        duration_minutes: checked.slot.duration_minutes(),
        total_price: checked.total_price,
        hourly_rate: checked.resource.hourly_rate,
        status: ReservationStatus::PendingPayment,
        created_at: Utc::now(),
        confirmed_at: None,
        cancelled_at: None,
    };
    let saved = store.save(reservation).await?;
    metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
    info!(
        "reservation {} created on court {} for {} {} ({})",
        saved.id(),
        saved.resource_id(),
        saved.date(),
        saved.slot(),
        saved.total_price()
    );
    Ok(saved)
}
