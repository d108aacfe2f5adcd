mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
pub mod resolver;
mod store;

pub use availability::{booked_windows, day_status, free_windows, merge_overlapping, subtract_slots};
pub use conflict::{can_cancel, check_operating_hours, compute_duration_and_price, CANCELLATION_NOTICE_SECS, PRICE_SCALE};
pub use error::{EngineError, HoursBound};
pub use store::{ReservationStore, ResourceCatalog};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Most appends folded into one fsync.
const JOURNAL_BATCH_LIMIT: usize = 512;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Takes whatever commands are queued, writes the appends
/// among them with a single fsync, and runs other commands in arrival order.
async fn journal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut inbox = Vec::with_capacity(JOURNAL_BATCH_LIMIT);
    let mut batch: Vec<PendingAppend> = Vec::new();
    while rx.recv_many(&mut inbox, JOURNAL_BATCH_LIMIT).await > 0 {
        for cmd in inbox.drain(..) {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    commit_batch(&mut wal, &mut batch);
                    handle_non_append(&mut wal, other);
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The scheduling engine: court catalog plus reservation store, one lock per court.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reservation id → court id.
    pub(super) reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Booker → reservation ids.
    pub(super) by_user: DashMap<Ulid, Vec<Ulid>>,
    /// Serializes new courts against compaction snapshots.
    pub(super) catalog_lock: Mutex<()>,
}

/// Apply a reservation event to its court (caller holds the lock).
fn apply_to_resource(
    rs: &mut ResourceState,
    event: &Event,
    reservation_map: &DashMap<Ulid, Ulid>,
    by_user: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::ResourceSaved { resource } => {
            rs.resource = resource.clone();
        }
        Event::ReservationSaved { reservation } => {
            let id = reservation.id();
            reservation_map.insert(id, reservation.resource_id());
            if let Some(previous) = rs.get(&id)
                && previous.user_id() != reservation.user_id()
                && let Some(mut ids) = by_user.get_mut(&previous.user_id()) {
                    ids.retain(|r| *r != id);
                }
            let mut ids = by_user.entry(reservation.user_id()).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
            drop(ids);
            rs.upsert(reservation.clone());
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(
                "journal {}: discarded a truncated or corrupt tail after {} records",
                wal_path.display(),
                replay.events.len()
            );
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            reservation_to_resource: DashMap::new(),
            by_user: DashMap::new(),
            catalog_lock: Mutex::new(()),
        };

        // Sole owner of every lock during replay, so try_write cannot fail;
        // blocking_write is off limits because this may run inside a runtime.
        for event in &replay.events {
            let resource_id = match event {
                Event::ResourceSaved { resource } => {
                    if !engine.state.contains_key(&resource.id) {
                        let rs = ResourceState::new(resource.clone());
                        engine.state.insert(resource.id, Arc::new(RwLock::new(rs)));
                        continue;
                    }
                    resource.id
                }
                Event::ReservationSaved { reservation } => reservation.resource_id(),
            };
            match engine.resource_state(&resource_id) {
                Some(rs) => {
                    let mut guard = rs
                        .try_write()
                        .map_err(|_| io::Error::other("replay: court state already locked"))?;
                    apply_to_resource(&mut guard, event, &engine.reservation_to_resource, &engine.by_user);
                }
                None => warn!("journal: reservation for unknown court {resource_id} skipped"),
            }
        }

        Ok(engine)
    }

    /// Write event to the journal via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn resource_state(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn resource_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_resource.get(reservation_id).map(|e| *e.value())
    }

    /// Journal-append then apply, under the caller's write guard.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.reservation_to_resource, &self.by_user);
        Ok(())
    }

    /// Lookup reservation → court, acquire that court's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .resource_for_reservation(reservation_id)
            .ok_or(EngineError::ReservationNotFound(*reservation_id))?;
        let rs = self
            .resource_state(&resource_id)
            .ok_or(EngineError::ResourceNotFound(resource_id))?;
        Ok(rs.write_owned().await)
    }
}
