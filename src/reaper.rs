use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::Engine;

/// Complete every CONFIRMED reservation that ended at or before `now`.
/// Returns how many were completed.
pub async fn sweep_once(engine: &Engine, now: NaiveDateTime) -> usize {
    complete_all(engine, engine.collect_elapsed(now).await).await
}

async fn complete_all(engine: &Engine, ids: Vec<Ulid>) -> usize {
    let mut completed = 0;
    for id in ids {
        match engine.complete_if_confirmed(id).await {
            Ok(Some(_)) => {
                completed += 1;
                metrics::counter!(crate::observability::COMPLETIONS_SWEPT_TOTAL).increment(1);
            }
            // cancelled or completed by someone else since the scan
            Ok(None) => debug!("sweeper skip {id}: no longer confirmed"),
            Err(e) if e.is_recoverable() => debug!("sweeper skip {id}: {e}"),
            Err(e) => warn!("sweeper failed to complete {id}: {e}"),
        }
    }
    completed
}

/// Background task that marks finished reservations COMPLETED.
/// Court hours are local wall-clock, so "now" is too.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        let completed = sweep_once(&engine, now).await;
        if completed > 0 {
            info!("sweeper completed {completed} reservations");
        }
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!("journal compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::resolver::BookingRequest;
    use crate::model::fixtures::*;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_completes_only_finished_confirmed() {
        let engine = Engine::new(test_wal_path("sweep.wal")).unwrap();
        let court = court();
        engine.upsert_resource(court.clone()).await.unwrap();
        let date = d(2024, 3, 10);

        let done = engine
            .create_reservation(BookingRequest::new(court.id, date, slot(8, 0, 9, 0), booker()))
            .await
            .unwrap();
        engine.confirm_reservation(done.id()).await.unwrap();
        let running = engine
            .create_reservation(BookingRequest::new(court.id, date, slot(9, 30, 11, 0), booker()))
            .await
            .unwrap();
        engine.confirm_reservation(running.id()).await.unwrap();
        let unpaid = engine
            .create_reservation(BookingRequest::new(court.id, date, slot(7, 0, 8, 0), booker()))
            .await
            .unwrap();

        let now = date.and_time(t(10, 0));
        assert_eq!(engine.collect_elapsed(now).await, vec![done.id()]);
        assert_eq!(sweep_once(&engine, now).await, 1);

        assert_eq!(
            engine.get_reservation(done.id()).await.unwrap().status(),
            ReservationStatus::Completed
        );
        assert_eq!(
            engine.get_reservation(running.id()).await.unwrap().status(),
            ReservationStatus::Confirmed
        );
        assert_eq!(
            engine.get_reservation(unpaid.id()).await.unwrap().status(),
            ReservationStatus::PendingPayment
        );

        // nothing left to do
        assert_eq!(sweep_once(&engine, now).await, 0);
    }

    #[tokio::test]
    async fn sweeper_end_boundary_inclusive() {
        let engine = Engine::new(test_wal_path("sweep_boundary.wal")).unwrap();
        let court = court();
        engine.upsert_resource(court.clone()).await.unwrap();
        let date = d(2024, 3, 10);
        let r = engine
            .create_reservation(BookingRequest::new(court.id, date, slot(8, 0, 9, 0), booker()))
            .await
            .unwrap();
        engine.confirm_reservation(r.id()).await.unwrap();

        assert!(engine.collect_elapsed(date.and_time(t(8, 59))).await.is_empty());
        assert_eq!(engine.collect_elapsed(date.and_time(t(9, 0))).await, vec![r.id()]);
    }

    #[tokio::test]
    async fn sweeper_skips_reservation_cancelled_after_scan() {
        let engine = Engine::new(test_wal_path("sweep_race.wal")).unwrap();
        let court = court();
        engine.upsert_resource(court.clone()).await.unwrap();
        let date = d(2024, 3, 10);
        let mut ids = Vec::new();
        for s in [slot(8, 0, 9, 0), slot(9, 0, 10, 0)] {
            let r = engine
                .create_reservation(BookingRequest::new(court.id, date, s, booker()))
                .await
                .unwrap();
            engine.confirm_reservation(r.id()).await.unwrap();
            ids.push(r.id());
        }

        let now = date.and_time(t(12, 0));
        let collected = engine.collect_elapsed(now).await;
        assert_eq!(collected.len(), 2);
        // an operator cancels one between the scan and the sweep
        engine
            .cancel_reservation(ids[0], CancellationPolicy::Immediate)
            .await
            .unwrap();

        assert_eq!(complete_all(&engine, collected).await, 1);
        assert_eq!(
            engine.get_reservation(ids[0]).await.unwrap().status(),
            ReservationStatus::Cancelled
        );
        assert_eq!(
            engine.get_reservation(ids[1]).await.unwrap().status(),
            ReservationStatus::Completed
        );
        assert_eq!(engine.complete_if_confirmed(ids[1]).await.unwrap(), None);
    }
}
