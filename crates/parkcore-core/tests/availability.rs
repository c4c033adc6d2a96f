//! Postgres-backed integration tests for `AvailabilityService`. Skipped
//! unless `PARKCORE_TEST_DATABASE_URL` is set, same gating as
//! `tests/coordinator.rs`.

use std::sync::Arc;

use chrono::NaiveDate;
use parkcore_common::{AmountMinorUnits, Spot};
use parkcore_core::availability::AvailabilityService;
use parkcore_core::coordinator::breaker::CacheBreaker;
use parkcore_core::lease::manager::{AcquireRequest, LeaseManager};
use parkcore_core::lease::memory_cache::InMemoryCoordinationCache;
use parkcore_core::persistence::{BookingRepo, PendingBookingRepo};
use sqlx::PgPool;
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../parkcore-server/src/db/migrations");

async fn test_pool() -> Option<PgPool> {
    let database_url = std::env::var("PARKCORE_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.expect("test postgres pool should connect");
    MIGRATOR.run(&pool).await.expect("migrations should apply");
    Some(pool)
}

async fn seed_lot_and_spots(pool: &PgPool, lot_id: Uuid, spot_ids: &[Uuid]) {
    sqlx::query("INSERT INTO lots (lot_id, city_id, name, lat, long, address, image_filename) VALUES ($1, $2, 'Test Lot', 0, 0, '123 Main St', 'lot.png')")
        .bind(lot_id)
        .bind(Uuid::new_v4())
        .execute(pool)
        .await
        .unwrap();
    for (index, spot_id) in spot_ids.iter().enumerate() {
        sqlx::query("INSERT INTO spots (spot_id, lot_id, spot_number, svg_coords, price_per_hour_minor_units) VALUES ($1, $2, $3, '0,0', 500)")
            .bind(spot_id)
            .bind(lot_id)
            .bind(format!("A{index}"))
            .execute(pool)
            .await
            .unwrap();
    }
}

fn spot(spot_id: Uuid, lot_id: Uuid, number: &str) -> Spot {
    Spot { spot_id, lot_id, spot_number: number.to_string(), svg_coords: "0,0".to_string(), price_per_hour: AmountMinorUnits(500) }
}

#[tokio::test]
async fn check_lot_marks_booked_pending_and_leased_spots_unavailable() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
        return;
    };

    let lot_id = Uuid::new_v4();
    let booked_spot = Uuid::new_v4();
    let pending_spot = Uuid::new_v4();
    let leased_spot = Uuid::new_v4();
    let free_spot = Uuid::new_v4();
    seed_lot_and_spots(&pool, lot_id, &[booked_spot, pending_spot, leased_spot, free_spot]).await;

    let date = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
    let cache = Arc::new(InMemoryCoordinationCache::new());
    let breaker = Arc::new(CacheBreaker::new());
    let bookings = Arc::new(BookingRepo::new(pool.clone()));
    let pending = Arc::new(PendingBookingRepo::new(pool.clone()));

    let mut tx = pool.begin().await.unwrap();
    BookingRepo::insert_tx(&mut tx, Uuid::new_v4(), lot_id, booked_spot, date, 9 * 60, 11 * 60, AmountMinorUnits(500))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    PendingBookingRepo::insert_tx(
        &mut tx,
        Uuid::new_v4(),
        Uuid::new_v4(),
        lot_id,
        pending_spot,
        date,
        9 * 60,
        11 * 60,
        AmountMinorUnits(500),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let manager = LeaseManager::new(Arc::clone(&cache));
    manager
        .acquire(AcquireRequest {
            spot_id: leased_spot,
            lot_id,
            user_id: Uuid::new_v4(),
            date,
            start_minutes: 9 * 60,
            end_minutes: 11 * 60,
            ttl_secs: 240,
            reservation_id: None,
        })
        .await
        .unwrap();

    let availability = AvailabilityService::new(Arc::clone(&cache), Arc::clone(&breaker), Arc::clone(&bookings), Arc::clone(&pending));
    let spots = vec![
        spot(booked_spot, lot_id, "A0"),
        spot(pending_spot, lot_id, "A1"),
        spot(leased_spot, lot_id, "A2"),
        spot(free_spot, lot_id, "A3"),
    ];

    let result = availability.check_lot(lot_id, &spots, date, 10 * 60, 10 * 60 + 30).await.unwrap();
    let available_by_id: std::collections::HashMap<Uuid, bool> =
        result.spots.iter().map(|entry| (entry.spot_id, entry.available)).collect();

    assert!(!available_by_id[&booked_spot]);
    assert!(!available_by_id[&pending_spot]);
    assert!(!available_by_id[&leased_spot]);
    assert!(available_by_id[&free_spot]);
    assert_eq!(result.booked_count, 1);
    assert_eq!(result.leased_count, 1);
}

#[tokio::test]
async fn is_available_ignores_a_lease_outside_the_query_window() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
        return;
    };

    let lot_id = Uuid::new_v4();
    let spot_id = Uuid::new_v4();
    seed_lot_and_spots(&pool, lot_id, &[spot_id]).await;

    let date = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
    let cache = Arc::new(InMemoryCoordinationCache::new());
    let breaker = Arc::new(CacheBreaker::new());
    let bookings = Arc::new(BookingRepo::new(pool.clone()));
    let pending = Arc::new(PendingBookingRepo::new(pool.clone()));

    let manager = LeaseManager::new(Arc::clone(&cache));
    manager
        .acquire(AcquireRequest {
            spot_id,
            lot_id,
            user_id: Uuid::new_v4(),
            date,
            start_minutes: 9 * 60,
            end_minutes: 10 * 60,
            ttl_secs: 240,
            reservation_id: None,
        })
        .await
        .unwrap();

    let availability = AvailabilityService::new(cache, breaker, bookings, pending);
    let available = availability.is_available(spot_id, lot_id, date, 14 * 60, 15 * 60).await.unwrap();
    assert!(available);
}
