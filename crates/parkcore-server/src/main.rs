#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

mod api;
mod config;
mod db;
mod error;
mod reference_data;
mod state;
mod workers;
mod ws;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use parkcore_core::availability::AvailabilityService;
use parkcore_core::coordinator::breaker::{CacheBreaker, CacheHealthProbe};
use parkcore_core::coordinator::payment::StripeLikePaymentProvider;
use parkcore_core::coordinator::BookingCoordinator;
use parkcore_core::lease::cache::CoordinationCache;
use parkcore_core::lease::expiry::ExpiryListener;
use parkcore_core::lease::redis_cache::RedisCoordinationCache;
use parkcore_core::persistence::{BookingRepo, IdempotencyRepo, LeaseAuditRepo, PendingBookingRepo};
use serde::Serialize;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::db::migrations::run_migrations;
use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};
use crate::reference_data::ReferenceDataRepo;
use crate::state::AppState;
use crate::workers::cross_instance_poller::CrossInstancePoller;
use crate::workers::expiry_bridge::ExpiryBridge;
use crate::workers::fallback_sweep::FallbackSweep;
use crate::workers::lease_audit_sweep::LeaseAuditSweep;
use crate::workers::pending_sweep::PendingSweep;
use crate::ws::room::RoomRegistry;

type DbCheckFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type DbCheckFn = dyn Fn() -> DbCheckFuture + Send + Sync;

/// Readiness gate: the pool must be reachable, and the cache-health probe
/// must have completed its first pass so a fresh process doesn't report
/// ready before it knows whether the coordination cache is up.
#[derive(Clone)]
struct ReadinessProbe {
    db_check: Arc<DbCheckFn>,
    cache_probed_once: Arc<AtomicBool>,
}

impl ReadinessProbe {
    fn from_pool(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        let db_check = Arc::new(move || {
            let pool = Arc::clone(&pool);
            Box::pin(async move { check_pool_health(&pool).await }) as DbCheckFuture
        });
        Self { db_check, cache_probed_once: Arc::new(AtomicBool::new(false)) }
    }

    #[cfg(test)]
    fn from_db_check<F>(db_check: F) -> Self
    where
        F: Fn() -> DbCheckFuture + Send + Sync + 'static,
    {
        Self { db_check: Arc::new(db_check), cache_probed_once: Arc::new(AtomicBool::new(false)) }
    }

    fn mark_cache_probed(&self) {
        self.cache_probed_once.store(true, Ordering::SeqCst);
    }

    async fn evaluate(&self) -> ReadinessResponse {
        let db_connected = (self.db_check)().await.is_ok();
        let cache_probed = self.cache_probed_once.load(Ordering::SeqCst);
        ReadinessResponse { ready: db_connected && cache_probed, db_connected, cache_probed }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ReadinessResponse {
    ready: bool,
    db_connected: bool,
    cache_probed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::ServerConfig::from_env().context("invalid parkcore-server configuration")?;

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_filter)),
        )
        .init();

    if cfg.is_dev_payment_key() {
        tracing::warn!("using development payment API key — set PARKCORE_PAYMENT_API_KEY in production");
    }

    let pool = create_pg_pool(&cfg.database_url, PoolConfig::from_env())
        .await
        .context("failed to initialize parkcore PostgreSQL pool")?;
    run_migrations(&pool).await.context("failed to run parkcore database migrations")?;
    check_pool_health(&pool).await.context("parkcore PostgreSQL health check failed")?;

    let readiness_probe = Arc::new(ReadinessProbe::from_pool(pool.clone()));

    let cache = Arc::new(
        RedisCoordinationCache::connect(&cfg.redis_url)
            .await
            .context("failed to connect to parkcore coordination cache")?,
    );
    let breaker = Arc::new(CacheBreaker::new());

    if let Err(err) = cache.ping().await {
        tracing::warn!(%err, "coordination cache unreachable at startup, starting degraded");
        breaker.trip();
    }
    readiness_probe.mark_cache_probed();

    let payment = Arc::new(StripeLikePaymentProvider::new(cfg.payment_api_base.clone(), cfg.payment_api_key.clone()));

    let bookings = Arc::new(BookingRepo::new(pool.clone()));
    let pending = Arc::new(PendingBookingRepo::new(pool.clone()));
    let idempotency = Arc::new(IdempotencyRepo::new(pool.clone()));
    let lease_audit = Arc::new(LeaseAuditRepo::new(pool.clone()));
    let reference_data = Arc::new(ReferenceDataRepo::new(pool.clone()));

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
        Arc::new(AvailabilityService::new(Arc::clone(&cache), Arc::clone(&breaker), Arc::clone(&bookings), Arc::clone(&pending)));
    let rooms = Arc::new(RoomRegistry::new(Arc::clone(&cache), Arc::clone(&breaker), pool.clone()));

    let state = AppState {
        coordinator,
        availability,
        rooms: Arc::clone(&rooms),
        reference_data: Arc::clone(&reference_data),
        breaker: Arc::clone(&breaker),
        config: Arc::new(cfg.clone()),
    };

    let cancellation = CancellationToken::new();

    tokio::spawn(CacheHealthProbe::new(Arc::clone(&cache), Arc::clone(&breaker)).run(cancellation.clone()));
    tokio::spawn(PendingSweep::new(Arc::clone(&pending), Arc::clone(&rooms)).run(cancellation.clone()));
    tokio::spawn(FallbackSweep::new(pool.clone()).run(cancellation.clone()));
    tokio::spawn(CrossInstancePoller::new(Arc::clone(&pending), Arc::clone(&rooms)).run(cancellation.clone()));
    tokio::spawn(LeaseAuditSweep::new(Arc::clone(&lease_audit), Arc::clone(&reference_data), Arc::clone(&rooms)).run(cancellation.clone()));

    tokio::spawn(run_expiry_pipeline(
        Arc::clone(&cache),
        Arc::clone(&breaker),
        Arc::clone(&rooms),
        Arc::clone(&reference_data),
        cancellation.clone(),
    ));

    let app = build_router(state, readiness_probe);

    let listener = TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind parkcore-server listener on {}", cfg.listen_addr))?;

    info!(listen_addr = %cfg.listen_addr, "starting parkcore-server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancellation))
        .await
        .context("parkcore-server exited unexpectedly")
}

fn build_router<C, P>(state: AppState<C, P>, readiness_probe: Arc<ReadinessProbe>) -> Router
where
    C: parkcore_core::lease::cache::CoordinationCache + 'static,
    P: parkcore_core::coordinator::payment::PaymentProvider + 'static,
{
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .merge(ws::handler::router(state.clone()))
        .merge(api::router(state))
        .layer(Extension(readiness_probe))
        .layer(middleware::from_fn(request_context_middleware))
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn ready(Extension(readiness_probe): Extension<Arc<ReadinessProbe>>) -> impl IntoResponse {
    let readiness = readiness_probe.evaluate().await;
    let status = if readiness.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(readiness))
}

async fn shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    cancellation.cancel();
}

/// Runs the expiry listener and its room-update bridge as a pair, and
/// restarts them once the cache recovers if the listener exits on a
/// transient cache error (`ExpiryListener::run`'s own doc: "re-established
/// by the recovery probe").
async fn run_expiry_pipeline<C: parkcore_core::lease::cache::CoordinationCache + 'static>(
    cache: Arc<C>,
    breaker: Arc<CacheBreaker>,
    rooms: Arc<RoomRegistry<C>>,
    reference_data: Arc<ReferenceDataRepo>,
    cancellation: CancellationToken,
) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(ExpiryBridge::new(Arc::clone(&rooms), Arc::clone(&reference_data)).run(rx));
        ExpiryListener::new(Arc::clone(&cache)).run(tx, cancellation.clone()).await;

        if cancellation.is_cancelled() {
            return;
        }

        while !breaker.is_healthy() {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
            }
        }
    }
}

async fn request_context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    request.headers_mut().insert(
        axum::http::HeaderName::from_static(crate::error::REQUEST_ID_HEADER),
        axum::http::HeaderValue::from_str(&request_id).unwrap_or_else(|_| axum::http::HeaderValue::from_static("invalid")),
    );

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let request_span = info_span!("parkcore.http.request", request_id = %request_id, method = %method, path = %path);
    let mut response =
        with_request_id_scope(request_id.clone(), next.run(request)).instrument(request_span).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "handled request"
    );

    response
}
