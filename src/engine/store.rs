use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error};
use ulid::Ulid;

use crate::limits::MAX_RESERVATIONS_PER_RESOURCE;
use crate::model::*;

use super::conflict::{active_overlaps, check_no_conflict, check_operating_hours, price_at_rate};
use super::{Engine, EngineError};

/// Read side of the court catalog, as the resolver sees it.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError>;
}

/// Where reservations live. `save` must re-check overlap atomically with the write.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Reservations on (resource, date) with a status in `statuses` whose slot
    /// overlaps `slot`, minus `exclude_id`.
    async fn find_overlapping(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        exclude_id: Option<Ulid>,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Insert or replace by id. A replacement keeps the stored lifecycle and
    /// booked rate; duration and price are re-derived from the slot.
    async fn save(&self, reservation: Reservation) -> Result<Reservation, EngineError>;

    /// Chronological by (date, start).
    async fn list_by_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, EngineError>;

    /// Newest first by (date, start).
    async fn list_by_user(&self, user_id: Ulid) -> Result<Vec<Reservation>, EngineError>;
}

#[async_trait]
impl ResourceCatalog for Engine {
    async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.resource.clone())
    }
}

#[async_trait]
impl ReservationStore for Engine {
    async fn find_overlapping(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        exclude_id: Option<Ulid>,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        if statuses == ACTIVE_STATUSES {
            return Ok(active_overlaps(&guard, date, &slot, exclude_id).cloned().collect());
        }
        Ok(guard
            .overlapping(date, &slot)
            .filter(|r| statuses.contains(&r.status()) && Some(r.id()) != exclude_id)
            .cloned()
            .collect())
    }

    async fn save(&self, mut reservation: Reservation) -> Result<Reservation, EngineError> {
        let id = reservation.id();
        let resource_id = reservation.resource_id();
        if let Some(bound) = self.resource_for_reservation(&id)
            && bound != resource_id {
                return Err(EngineError::AlreadyExists(id));
            }
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let mut guard = rs.write().await;

        let moved = match guard.get(&id) {
            Some(current) => {
                if let Err(e) = carry_lifecycle(current, &mut reservation) {
                    metrics::counter!(crate::observability::INVALID_TRANSITIONS_TOTAL).increment(1);
                    error!("reservation {id}: {e}");
                    return Err(e);
                }
                current.date() != reservation.date() || current.slot() != reservation.slot()
            }
            None => {
                if guard.reservation_count() >= MAX_RESERVATIONS_PER_RESOURCE {
                    return Err(EngineError::LimitExceeded("too many reservations on court"));
                }
                true
            }
        };
        if moved && reservation.is_active() {
            if !guard.resource.active {
                return Err(EngineError::ResourceInactive(resource_id));
            }
            check_operating_hours(&guard.resource, &reservation.slot())?;
        }
        if reservation.is_active()
            && let Err(e) = check_no_conflict(&guard, reservation.date(), &reservation.slot(), Some(id)) {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL, "phase" => "commit").increment(1);
                debug!("commit-time conflict for {id} on court {resource_id}: {e}");
                return Err(e);
            }

        // duration and price always follow the slot
        let (_, total_price) = price_at_rate(reservation.hourly_rate, &reservation.slot())?;
        reservation.duration_minutes = reservation.slot().duration_minutes();
        reservation.total_price = total_price;

        let event = Event::ReservationSaved {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    async fn list_by_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations().cloned().collect())
    }

    async fn list_by_user(&self, user_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let ids = self
            .by_user
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(rs) = self.resource_for_reservation(&id).and_then(|rid| self.resource_state(&rid)) else {
                continue;
            };
            let guard = rs.read().await;
            if let Some(r) = guard.get(&id) {
                found.push(r.clone());
            }
        }
        found.sort_by(|a, b| (b.date(), b.slot().start()).cmp(&(a.date(), a.slot().start())));
        Ok(found)
    }
}

/// Replacing a stored reservation keeps its lifecycle intact. Terminal
/// reservations are frozen, status moves only along legal edges, and a
/// stamp that is already set never changes. Creation time and the booked
/// rate come from the stored copy.
fn carry_lifecycle(current: &Reservation, incoming: &mut Reservation) -> Result<(), EngineError> {
    let (id, from, to) = (current.id(), current.status(), incoming.status());
    let refused = || EngineError::InvalidTransition { id, from, to };

    if from.is_terminal() {
        return if *incoming == *current { Ok(()) } else { Err(refused()) };
    }
    let rewritten = |set: Option<DateTime<Utc>>, given: Option<DateTime<Utc>>| set.is_some() && set != given;
    if rewritten(current.confirmed_at, incoming.confirmed_at)
        || rewritten(current.cancelled_at, incoming.cancelled_at)
    {
        return Err(refused());
    }

    let mut expected = current.clone();
    if to != from {
        expected.transition(to, Utc::now())?;
    }
    incoming.created_at = current.created_at;
    incoming.hourly_rate = current.hourly_rate;
    incoming.confirmed_at = expected.confirmed_at;
    incoming.cancelled_at = expected.cancelled_at;
    Ok(())
}
