use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, TimeDelta};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use courtbook::engine::resolver::{self, BookingRequest};
use courtbook::engine::{Engine, EngineError, ReservationStore};
use courtbook::model::*;

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("courtbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn open_with_courts(path: PathBuf, n: usize) -> (Arc<Engine>, Vec<Resource>) {
    let engine = Arc::new(Engine::new(path).unwrap());
    let mut courts = Vec::new();
    for i in 0..n {
        let court = Resource::new(Ulid::new(), hm(7, 0), hm(23, 0), Decimal::from(80_000))
            .with_name(format!("Court {}", i + 1));
        courts.push(engine.upsert_resource(court).await.unwrap());
    }
    (engine, courts)
}

fn player(name: &str) -> BookerInfo {
    let mut booker = BookerInfo::new(Ulid::new(), name, "0812 0000 0000");
    booker.email = Some(format!("{}@example.com", name.to_lowercase()));
    booker
}

// ── Multi-step form flow ─────────────────────────────────────

#[tokio::test]
async fn form_flow_start_plus_duration() {
    let (engine, courts) = open_with_courts(data_dir().join("j.wal"), 1).await;
    let court = &courts[0];
    let date = day(2025, 8, 17);

    // step one: pick a start and a duration
    let chosen = Slot::starting_at(hm(19, 0), 90).unwrap();
    assert_eq!(chosen.to_string(), "19:00 - 20:30");

    // step two: the slot is checked and priced
    let checked = resolver::validate_request(
        engine.as_ref(),
        BookingRequest::new(court.id, date, chosen, player("Naomi")),
    )
    .await
    .unwrap();
    let checked = resolver::confirm_slot_free(engine.as_ref(), checked).await.unwrap();
    assert_eq!(checked.total_price(), Decimal::from(120_000));

    // step three: persisted without repeating the check
    let r = resolver::create_reservation_presumed_valid(engine.as_ref(), checked)
        .await
        .unwrap();
    assert_eq!(r.status(), ReservationStatus::PendingPayment);
    assert_eq!(r.booker().email.as_deref(), Some("naomi@example.com"));

    // operator verifies payment
    let r = engine.confirm_reservation(r.id()).await.unwrap();
    assert_eq!(r.status(), ReservationStatus::Confirmed);

    // crossing midnight is never a slot
    assert!(matches!(
        Slot::starting_at(hm(22, 30), 120),
        Err(EngineError::InvalidInterval(_))
    ));
}

#[tokio::test]
async fn string_times_from_a_form() {
    let (engine, courts) = open_with_courts(data_dir().join("j.wal"), 1).await;
    let court = &courts[0];
    let s = assert_ok!(Slot::parse("08:00", "09:30"));
    let r = assert_ok!(
        engine
            .create_reservation(BookingRequest::new(court.id, day(2025, 1, 4), s, player("Ash")))
            .await
    );
    assert_eq!(r.total_price(), Decimal::from(120_000));

    assert_err!(Slot::parse("8am", "09:30"));
    assert_err!(Slot::parse("10:00", "09:30"));
}

// ── Contention ───────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prime_time_rush_never_double_books() {
    let (engine, courts) = open_with_courts(data_dir().join("j.wal"), 3).await;
    let date = day(2025, 8, 17);

    // 60 bookers racing for overlapping evening slots on three courts
    let attempts = (0..60u32).map(|i| {
        let engine = engine.clone();
        let court = courts[(i % 3) as usize].id;
        let start = hm(18, (i % 4) * 15);
        let s = Slot::starting_at(start, 60).unwrap();
        async move {
            engine
                .create_reservation(BookingRequest::new(court, date, s, player("Rush")))
                .await
        }
    });
    let results = join_all(attempts.map(tokio::spawn)).await;

    let mut won = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert!(matches!(e, EngineError::Conflict { .. }), "{e}"),
        }
    }
    // all four starts overlap each other, so one winner per court
    assert_eq!(won, 3);

    for court in &courts {
        let active: Vec<_> = engine
            .list_by_resource(court.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.is_active())
            .collect();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                assert!(a.date() != b.date() || !a.slot().overlaps(&b.slot()));
            }
        }
    }
}

// ── Lifecycle across restarts ────────────────────────────────

#[tokio::test]
async fn week_of_bookings_survives_restart_and_compaction() {
    let path = data_dir().join("j.wal");
    let me = player("Iga");
    let monday = day(2025, 3, 3);

    let court_id = {
        let (engine, courts) = open_with_courts(path.clone(), 1).await;
        let court = courts[0].id;
        for offset in 0..7 {
            let date = monday + TimeDelta::days(offset);
            let r = engine
                .create_reservation(BookingRequest::new(court, date, Slot::parse("07:00", "08:00").unwrap(), me.clone()))
                .await
                .unwrap();
            if offset % 2 == 0 {
                engine.confirm_reservation(r.id()).await.unwrap();
            }
        }
        assert_ok!(engine.compact_wal().await);

        // the weekend ends up played
        let swept = courtbook::reaper::sweep_once(&engine, day(2025, 3, 10).and_time(hm(0, 0))).await;
        assert_eq!(swept, 4);
        court
    };

    let engine = Engine::new(path).unwrap();
    let mine = engine.list_by_user(me.user_id).await.unwrap();
    assert_eq!(mine.len(), 7);
    assert_eq!(mine[0].date(), monday + TimeDelta::days(6));

    let summary = engine.resource_summary(court_id).await.unwrap();
    assert_eq!(summary.pending, 3);
    assert_eq!(summary.confirmed, 0);
    assert_eq!(summary.revenue, Decimal::from(4 * 80_000));

    let overview = engine.user_overview(me.user_id, day(2025, 3, 10)).await.unwrap();
    assert!(overview.upcoming.is_empty());
    assert_eq!(overview.pending.len(), 3);
    assert_eq!(overview.past.len(), 7);
}

#[tokio::test]
async fn booker_cancel_window() {
    let (engine, courts) = open_with_courts(data_dir().join("j.wal"), 1).await;
    let date = day(2031, 1, 1);
    let r = engine
        .create_reservation(BookingRequest::new(courts[0].id, date, Slot::parse("09:00", "10:00").unwrap(), player("Coco")))
        .await
        .unwrap();

    let the_evening_before = date.pred_opt().unwrap().and_time(hm(9, 1));
    let err = engine
        .cancel_reservation(r.id(), CancellationPolicy::Notice { now: the_evening_before })
        .await
        .unwrap_err();
    assert!(err.is_recoverable());
    assert!(err.to_string().starts_with("Cannot cancel booking less than 24 hours before start time"));

    let two_days_before = date.and_time(hm(9, 0)) - TimeDelta::days(2);
    assert!(courtbook::engine::can_cancel(&r, two_days_before));
    assert_ok!(
        engine
            .cancel_reservation(r.id(), CancellationPolicy::Notice { now: two_days_before })
            .await
    );
}
