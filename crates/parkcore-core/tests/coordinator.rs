//! Postgres-backed integration tests. Skipped unless
//! `PARKCORE_TEST_DATABASE_URL` is set, following the same pattern as
//! `SCRIPTUM_RELAY_TEST_DATABASE_URL`-gated leader-election tests elsewhere
//! in this workspace.

use std::sync::Arc;

use chrono::NaiveDate;
use parkcore_common::{AmountMinorUnits, ConfirmOutcome};
use parkcore_core::coordinator::breaker::CacheBreaker;
use parkcore_core::coordinator::payment::FakePaymentProvider;
use parkcore_core::coordinator::{BookingCoordinator, BookingRequest};
use parkcore_core::lease::memory_cache::InMemoryCoordinationCache;
use parkcore_core::persistence::{BookingRepo, IdempotencyRepo, LeaseAuditRepo, PendingBookingRepo};
use sqlx::PgPool;
use uuid::Uuid;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../parkcore-server/src/db/migrations");

async fn test_pool() -> Option<PgPool> {
    let database_url = std::env::var("PARKCORE_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.expect("test postgres pool should connect");
    MIGRATOR.run(&pool).await.expect("migrations should apply");
    Some(pool)
}

async fn seed_spot(pool: &PgPool, lot_id: Uuid, spot_id: Uuid) {
    sqlx::query("INSERT INTO lots (lot_id, city_id, name, lat, long, address, image_filename) VALUES ($1, $2, 'Test Lot', 0, 0, '123 Main St', 'lot.png')")
        .bind(lot_id)
        .bind(Uuid::new_v4())
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO spots (spot_id, lot_id, spot_number, svg_coords, price_per_hour_minor_units) VALUES ($1, $2, 'A1', '0,0', 500)")
        .bind(spot_id)
        .bind(lot_id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn leased_path_confirms_exactly_one_booking_under_a_race() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
        return;
    };

    let lot_id = Uuid::new_v4();
    let spot_id = Uuid::new_v4();
    seed_spot(&pool, lot_id, spot_id).await;

    let cache = Arc::new(InMemoryCoordinationCache::new());
    let breaker = Arc::new(CacheBreaker::new());
    let payment = Arc::new(FakePaymentProvider::new());
    let bookings = Arc::new(BookingRepo::new(pool.clone()));
    let pending = Arc::new(PendingBookingRepo::new(pool.clone()));
    let idempotency = Arc::new(IdempotencyRepo::new(pool.clone()));
    let lease_audit = Arc::new(LeaseAuditRepo::new(pool.clone()));

    let coordinator = BookingCoordinator::new(
        pool.clone(),
        cache,
        breaker,
        payment,
        bookings,
        pending,
        idempotency,
        lease_audit,
    );

    let date = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let make_request = |user_id: Uuid| BookingRequest {
        user_id,
        lot_id,
        spot_id,
        date,
        start_minutes: 10 * 60,
        end_minutes: 12 * 60,
        amount: AmountMinorUnits(500),
        success_path: "https://example.test/payment_success".to_string(),
        existing_reservation_id: None,
    };

    let first = coordinator.request_booking(make_request(user_a)).await.unwrap();
    let second = coordinator.request_booking(make_request(user_b)).await.unwrap();

    use parkcore_core::coordinator::BookingOutcome;
    let (winner_user_id, winner_reservation_id) = match (first, second) {
        (BookingOutcome::Leased { reservation_id, .. }, BookingOutcome::Failed { reason }) => {
            assert_eq!(reason, "taken");
            (user_a, reservation_id)
        }
        (BookingOutcome::Failed { reason }, BookingOutcome::Leased { reservation_id, .. }) => {
            assert_eq!(reason, "taken");
            (user_b, reservation_id)
        }
        _ => panic!("expected exactly one Leased outcome and one taken Failed outcome"),
    };

    let outcome = coordinator
        .confirm_leased(winner_reservation_id, winner_user_id, spot_id, AmountMinorUnits(500), "stripe_test_session")
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmOutcome::Success { .. }));

    let outcome_again = coordinator
        .confirm_leased(winner_reservation_id, winner_user_id, spot_id, AmountMinorUnits(500), "stripe_test_session")
        .await
        .unwrap();
    assert_eq!(outcome, outcome_again);
}

#[tokio::test]
async fn repeated_confirm_with_same_idempotency_key_is_stable() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
        return;
    };

    let lot_id = Uuid::new_v4();
    let spot_id = Uuid::new_v4();
    seed_spot(&pool, lot_id, spot_id).await;

    let idempotency = IdempotencyRepo::new(pool.clone());
    let key = format!("stripe_{}", Uuid::new_v4());
    let outcome = ConfirmOutcome::Success { booking_id: Uuid::new_v4() };

    let mut tx = pool.begin().await.unwrap();
    IdempotencyRepo::store_tx(&mut tx, &key, &outcome).await.unwrap();
    tx.commit().await.unwrap();

    let reread = idempotency.find(&key).await.unwrap();
    assert_eq!(reread, Some(outcome));
}
