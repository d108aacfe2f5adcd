use chrono::{NaiveDate, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::MAX_CALENDAR_DAYS;
use crate::model::*;

use super::availability::{booked_windows, day_status, free_windows};
use super::resolver;
use super::{Engine, EngineError, ReservationStore, ResourceCatalog};

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self
            .resource_for_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        guard
            .get(&id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Every court, in id order.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let courts: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut resources = Vec::with_capacity(courts.len());
        for rs in courts {
            resources.push(rs.read().await.resource.clone());
        }
        resources.sort_by_key(|r| r.id);
        resources
    }

    /// Overlap check from raw times. Pass the reservation's own id as
    /// `exclude_id` when re-checking an existing booking.
    pub async fn check_availability(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude_id: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let slot = Slot::new(start, end)?;
        let resource = self.get_resource(resource_id).await?;
        resolver::check_availability(self, &resource, date, &slot, exclude_id).await
    }

    pub async fn booked_windows(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Slot>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(booked_windows(&guard, date))
    }

    pub async fn free_windows(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Slot>, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, date))
    }

    /// One entry per day starting at `from`, read under a single guard.
    pub async fn availability_calendar(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        days: u32,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        if days > MAX_CALENDAR_DAYS {
            return Err(EngineError::LimitExceeded("calendar span too long"));
        }
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        let mut calendar = Vec::with_capacity(days as usize);
        for offset in 0..days {
            let Some(date) = from.checked_add_signed(TimeDelta::days(i64::from(offset))) else {
                break;
            };
            calendar.push(day_status(&guard, date));
        }
        Ok(calendar)
    }

    /// Split a booker's reservations the way their dashboard lists them.
    /// A pending reservation dated today or later shows in both `upcoming`
    /// and `pending`.
    pub async fn user_overview(&self, user_id: Ulid, today: NaiveDate) -> Result<UserOverview, EngineError> {
        let mut overview = UserOverview::default();
        for r in self.list_by_user(user_id).await? {
            if r.status() == ReservationStatus::PendingPayment {
                overview.pending.push(r.clone());
            }
            if r.is_active() && r.date() >= today {
                overview.upcoming.push(r);
            } else if r.date() < today || r.status().is_terminal() {
                overview.past.push(r);
            }
        }
        Ok(overview)
    }

    pub async fn resource_summary(&self, resource_id: Ulid) -> Result<ResourceSummary, EngineError> {
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        let guard = rs.read().await;
        let mut summary = ResourceSummary {
            resource_id,
            pending: 0,
            confirmed: 0,
            revenue: Decimal::ZERO,
        };
        for r in guard.reservations() {
            match r.status() {
                ReservationStatus::PendingPayment => summary.pending += 1,
                ReservationStatus::Confirmed => {
                    summary.confirmed += 1;
                    summary.revenue += r.total_price();
                }
                ReservationStatus::Completed => summary.revenue += r.total_price(),
                ReservationStatus::Cancelled => {}
            }
        }
        Ok(summary)
    }

    /// Operator search across courts, newest first by (date, start).
    pub async fn search_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let courts: Vec<_> = match filter.resource_id {
            Some(id) => vec![
                self.resource_state(&id)
                    .ok_or(EngineError::ResourceNotFound(id))?,
            ],
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let mut found = Vec::new();
        for rs in courts {
            let guard = rs.read().await;
            found.extend(guard.reservations().filter(|r| filter.matches(r)).cloned());
        }
        found.sort_by(|a, b| (b.date(), b.slot().start()).cmp(&(a.date(), a.slot().start())));
        Ok(found)
    }
}
