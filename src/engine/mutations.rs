use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{can_cancel, validate_resource};
use super::resolver::{self, BookingRequest};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Add a court or replace its settings. Existing reservations keep the
    /// price they were booked at.
    pub async fn upsert_resource(&self, resource: Resource) -> Result<Resource, EngineError> {
        validate_resource(&resource)?;
        let _catalog = self.catalog_lock.lock().await;
        let event = Event::ResourceSaved {
            resource: resource.clone(),
        };

        match self.resource_state(&resource.id) {
            Some(rs) => {
                let mut guard = rs.write().await;
                self.persist_and_apply(&mut guard, &event).await?;
                info!("court {} updated", resource.id);
            }
            None => {
                if self.state.len() >= MAX_RESOURCES {
                    return Err(EngineError::LimitExceeded("too many courts"));
                }
                self.wal_append(&event).await?;
                let rs = ResourceState::new(resource.clone());
                self.state.insert(resource.id, Arc::new(RwLock::new(rs)));
                info!("court {} added", resource.id);
            }
        }
        Ok(resource)
    }

    /// Inactive courts keep their reservations but accept no new bookings.
    pub async fn set_resource_active(&self, id: Ulid, active: bool) -> Result<Resource, EngineError> {
        let rs = self
            .resource_state(&id)
            .ok_or(EngineError::ResourceNotFound(id))?;
        let mut guard = rs.write().await;
        if guard.resource.active == active {
            return Ok(guard.resource.clone());
        }
        let mut resource = guard.resource.clone();
        resource.active = active;
        let event = Event::ResourceSaved {
            resource: resource.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("court {id} active={active}");
        Ok(resource)
    }

    /// Full admission path against this engine's own catalog and store.
    pub async fn create_reservation(&self, request: BookingRequest) -> Result<Reservation, EngineError> {
        resolver::create_reservation(self, self, request).await
    }

    /// PENDING_PAYMENT → CONFIRMED once payment is verified.
    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition_reservation(id, ReservationStatus::Confirmed, |_| Ok(()))
            .await
    }

    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        policy: CancellationPolicy,
    ) -> Result<Reservation, EngineError> {
        self.transition_reservation(id, ReservationStatus::Cancelled, |r| match policy {
            CancellationPolicy::Notice { now } if r.is_active() && !can_cancel(r, now) => {
                Err(EngineError::CancellationWindowClosed {
                    id: r.id(),
                    starts_at: r.starts_at(),
                })
            }
            _ => Ok(()),
        })
        .await
    }

    pub async fn complete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition_reservation(id, ReservationStatus::Completed, |_| Ok(()))
            .await
    }

    /// Sweeper path: complete `id` only if it is still CONFIRMED. Anything
    /// cancelled or completed since it was collected is left alone.
    pub async fn complete_if_confirmed(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = match guard.get(&id) {
            Some(r) if r.status() == ReservationStatus::Confirmed => r.clone(),
            _ => return Ok(None),
        };
        self.apply_transition(&mut guard, current, ReservationStatus::Completed)
            .await
            .map(Some)
    }

    /// Move one reservation along the state machine under its court's write lock.
    async fn transition_reservation(
        &self,
        id: Ulid,
        to: ReservationStatus,
        precheck: impl FnOnce(&Reservation) -> Result<(), EngineError>,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .get(&id)
            .ok_or(EngineError::ReservationNotFound(id))?
            .clone();
        precheck(&current)?;
        self.apply_transition(&mut guard, current, to).await
    }

    async fn apply_transition(
        &self,
        rs: &mut ResourceState,
        mut updated: Reservation,
        to: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let id = updated.id();
        if let Err(e) = updated.transition(to, Utc::now()) {
            metrics::counter!(crate::observability::INVALID_TRANSITIONS_TOTAL).increment(1);
            error!("reservation {id}: {e}");
            return Err(e);
        }

        let event = Event::ReservationSaved {
            reservation: updated.clone(),
        };
        self.persist_and_apply(rs, &event).await?;
        metrics::counter!(crate::observability::STATUS_TRANSITIONS_TOTAL, "to" => to.as_str())
            .increment(1);
        info!("reservation {id} is now {to}");
        Ok(updated)
    }

    /// CONFIRMED reservations whose end is at or before `now`.
    pub async fn collect_elapsed(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let courts: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut elapsed = Vec::new();
        for rs in courts {
            let guard = rs.read().await;
            // days are in order, so stop at the first one that starts after `now`
            for r in guard.reservations() {
                if r.date() > now.date() {
                    break;
                }
                if r.status() == ReservationStatus::Confirmed && r.ends_at() <= now {
                    elapsed.push(r.id());
                }
            }
        }
        elapsed
    }

    /// Rewrite the journal as one snapshot per court and reservation.
    ///
    /// Holds the catalog lock and a read guard on every court until the
    /// writer has swapped files, so no append can land in the old journal
    /// after its snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let mut courts: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        courts.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(courts.len());
        for (_, rs) in courts {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::ResourceSaved {
                resource: guard.resource.clone(),
            });
            for r in guard.reservations() {
                events.push(Event::ReservationSaved {
                    reservation: r.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);

        info!("journal compacted to {count} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
