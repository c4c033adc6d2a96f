pub mod availability;
pub mod lots;
pub mod payments;

use axum::routing::{get, post};
use axum::Router;

use parkcore_core::coordinator::payment::PaymentProvider;
use parkcore_core::lease::cache::CoordinationCache;

use crate::state::AppState;

pub fn router<C, P>(state: AppState<C, P>) -> Router
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    Router::new()
        .route("/check_spot_availability", post(availability::check_spot_availability))
        .route("/city_selected", post(lots::city_selected))
        .route("/payment_success", get(payments::payment_success))
        .route("/payment_success_direct", get(payments::payment_success_direct))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::NaiveDate;
    use parkcore_core::availability::AvailabilityService;
    use parkcore_core::coordinator::breaker::CacheBreaker;
    use parkcore_core::coordinator::payment::FakePaymentProvider;
    use parkcore_core::coordinator::BookingCoordinator;
    use parkcore_core::lease::memory_cache::InMemoryCoordinationCache;
    use parkcore_core::persistence::{BookingRepo, IdempotencyRepo, LeaseAuditRepo, PendingBookingRepo};
    use sqlx::PgPool;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../parkcore-server/src/db/migrations");

    async fn test_pool() -> Option<PgPool> {
        let database_url = std::env::var("PARKCORE_TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.expect("test postgres pool should connect");
        MIGRATOR.run(&pool).await.expect("migrations should apply");
        Some(pool)
    }

    async fn test_state(pool: PgPool) -> AppState<InMemoryCoordinationCache, FakePaymentProvider> {
        let cache = Arc::new(InMemoryCoordinationCache::new());
        let breaker = Arc::new(CacheBreaker::new());
        let payment = Arc::new(FakePaymentProvider::new());
        let bookings = Arc::new(BookingRepo::new(pool.clone()));
        let pending = Arc::new(PendingBookingRepo::new(pool.clone()));
        let idempotency = Arc::new(IdempotencyRepo::new(pool.clone()));
        let lease_audit = Arc::new(LeaseAuditRepo::new(pool.clone()));
        let reference_data = Arc::new(crate::reference_data::ReferenceDataRepo::new(pool.clone()));

        let coordinator = Arc::new(BookingCoordinator::new(
            pool.clone(),
            Arc::clone(&cache),
            Arc::clone(&breaker),
            Arc::clone(&payment),
            Arc::clone(&bookings),
            Arc::clone(&pending),
            Arc::clone(&idempotency),
            Arc::clone(&lease_audit),
        ));
        let availability =
            Arc::new(AvailabilityService::new(Arc::clone(&cache), Arc::clone(&breaker), Arc::clone(&bookings), pending));
        let rooms = Arc::new(crate::ws::room::RoomRegistry::new(Arc::clone(&cache), Arc::clone(&breaker), pool.clone()));

        AppState {
            coordinator,
            availability,
            rooms,
            reference_data,
            breaker,
            config: Arc::new(crate::config::ServerConfig {
                listen_addr: "0.0.0.0:0".parse().unwrap(),
                database_url: String::new(),
                redis_url: String::new(),
                payment_api_base: String::new(),
                payment_api_key: String::new(),
                public_base_url: "https://parkcore.example.test".to_string(),
                log_filter: "info".to_string(),
            }),
        }
    }

    async fn seed_lot_and_spot(pool: &PgPool, lot_id: Uuid, spot_id: Uuid) {
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
    async fn check_spot_availability_round_trips_through_the_router() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };

        let lot_id = Uuid::new_v4();
        let spot_id = Uuid::new_v4();
        seed_lot_and_spot(&pool, lot_id, spot_id).await;

        let app = router(test_state(pool).await);
        let body = serde_json::json!({
            "parking_lot_id": lot_id,
            "booking_date": NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
            "start_time": "10:00",
            "end_time": "12:00",
        });

        let request = Request::builder()
            .method("POST")
            .uri("/check_spot_availability")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["booked_count"], 0);
        assert_eq!(parsed["leased_count"], 0);
        assert_eq!(parsed["spots"].as_array().unwrap().len(), 1);
        assert_eq!(parsed["spots"][0]["is_available"], true);
    }

    #[tokio::test]
    async fn check_spot_availability_rejects_an_unknown_lot() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };

        let app = router(test_state(pool).await);
        let body = serde_json::json!({
            "parking_lot_id": Uuid::new_v4(),
            "booking_date": NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
            "start_time": "10:00",
            "end_time": "12:00",
        });

        let request = Request::builder()
            .method("POST")
            .uri("/check_spot_availability")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unregistered_route_is_not_found() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };

        let app = router(test_state(pool).await);
        let request = Request::builder().method("GET").uri("/no-such-route").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
