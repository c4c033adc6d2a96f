// Subscription rooms and per-connection session state. A single server
// process holds every socket it serves in-process, so the in-memory map
// below is the authoritative delivery path; the coordination-cache mirror
// and the `active_connections` DB fallback row exist for cross-instance
// visibility and for the `fallback_sweep` worker to reap stale sessions,
// not as an alternate local-delivery route.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parkcore_common::{overlaps, RoomKey, ServerEvent};
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use parkcore_core::coordinator::breaker::CacheBreaker;
use parkcore_core::lease::cache::CoordinationCache;

/// `ActiveConnection` TTL used for the DB fallback row.
const FALLBACK_CONNECTION_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
struct Subscriber {
    sender: mpsc::UnboundedSender<ServerEvent>,
    user_id: Option<Uuid>,
    start_minutes: u16,
    end_minutes: u16,
    reservation_id: Option<Uuid>,
    payment_context: bool,
}

#[derive(Debug, Clone, Copy)]
struct ConnectionLocation {
    room: RoomKey,
}

/// Tracks which room (if any) each live connection belongs to, and the
/// per-connection session data (window, reservation id) needed to filter
/// `spot_update` emissions.
#[derive(Clone)]
pub struct RoomRegistry<C: CoordinationCache> {
    rooms: Arc<RwLock<HashMap<RoomKey, HashMap<Uuid, Subscriber>>>>,
    locations: Arc<RwLock<HashMap<Uuid, ConnectionLocation>>>,
    /// Every connection currently acting as a given user, so a payment
    /// callback can reach all of that user's open sockets. Kept in sync
    /// with `rooms`/`locations`: populated on `subscribe`, pruned when a
    /// connection leaves its room.
    user_connections: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
    cache: Arc<C>,
    breaker: Arc<CacheBreaker>,
    pool: PgPool,
}

impl<C: CoordinationCache> RoomRegistry<C> {
    pub fn new(cache: Arc<C>, breaker: Arc<CacheBreaker>, pool: PgPool) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            locations: Arc::new(RwLock::new(HashMap::new())),
            user_connections: Arc::new(RwLock::new(HashMap::new())),
            cache,
            breaker,
            pool,
        }
    }

    /// `subscribe{lotId, date, start, end}`: join the room, leaving any
    /// previously joined room on this connection.
    #[allow(clippy::too_many_arguments)]
    pub async fn subscribe(
        &self,
        connection_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEvent>,
        user_id: Option<Uuid>,
        room: RoomKey,
        start_minutes: u16,
        end_minutes: u16,
    ) {
        self.leave_current_room(connection_id).await;

        let subscriber = Subscriber {
            sender,
            user_id,
            start_minutes,
            end_minutes,
            reservation_id: None,
            payment_context: false,
        };

        {
            let mut rooms = self.rooms.write().await;
            rooms.entry(room).or_default().insert(connection_id, subscriber);
        }
        {
            let mut locations = self.locations.write().await;
            locations.insert(connection_id, ConnectionLocation { room });
        }
        if let Some(user_id) = user_id {
            let mut user_connections = self.user_connections.write().await;
            user_connections.entry(user_id).or_default().insert(connection_id);
        }

        if self.breaker.is_healthy() {
            let _ = self.cache.sadd(&format!("active_rooms:{}", room.cache_key()), &connection_id.to_string()).await;
        } else {
            self.upsert_fallback_row(connection_id, user_id, room, start_minutes, end_minutes, None).await;
        }
    }

    /// Attach a reservation id to the connection's session once a lease is
    /// acquired, so a reconnect can recover it idempotently.
    pub async fn set_reservation(&self, connection_id: Uuid, reservation_id: Option<Uuid>, payment_context: bool) {
        let room = {
            let locations = self.locations.read().await;
            locations.get(&connection_id).map(|location| location.room)
        };
        let Some(room) = room else { return };
        let mut rooms = self.rooms.write().await;
        if let Some(subscribers) = rooms.get_mut(&room) {
            if let Some(subscriber) = subscribers.get_mut(&connection_id) {
                subscriber.reservation_id = reservation_id;
                subscriber.payment_context = payment_context;
            }
        }
    }

    pub async fn reservation_of(&self, connection_id: Uuid) -> Option<(Uuid, bool)> {
        let room = self.locations.read().await.get(&connection_id).map(|location| location.room)?;
        let rooms = self.rooms.read().await;
        let subscriber = rooms.get(&room)?.get(&connection_id)?;
        subscriber.reservation_id.map(|reservation_id| (reservation_id, subscriber.payment_context))
    }

    /// `disconnect`: leave all rooms. Returns `Some((reservation_id,
    /// payment_context))` if the connection held one, so the caller can
    /// decide whether to release it (a lease held for an in-flight payment
    /// must survive the socket closing).
    pub async fn disconnect(&self, connection_id: Uuid) -> Option<(Uuid, bool)> {
        let held = self.reservation_of(connection_id).await;
        self.leave_current_room(connection_id).await;
        held
    }

    async fn leave_current_room(&self, connection_id: Uuid) {
        let previous = self.locations.write().await.remove(&connection_id);
        let Some(previous) = previous else { return };
        let removed_user_id = {
            let mut rooms = self.rooms.write().await;
            let mut removed_user_id = None;
            let mut room_is_empty = false;
            if let Some(subscribers) = rooms.get_mut(&previous.room) {
                removed_user_id = subscribers.remove(&connection_id).and_then(|subscriber| subscriber.user_id);
                room_is_empty = subscribers.is_empty();
            }
            if room_is_empty {
                rooms.remove(&previous.room);
            }
            removed_user_id
        };
        if let Some(user_id) = removed_user_id {
            let mut user_connections = self.user_connections.write().await;
            if let Some(connections) = user_connections.get_mut(&user_id) {
                connections.remove(&connection_id);
                if connections.is_empty() {
                    user_connections.remove(&user_id);
                }
            }
        }
        if self.breaker.is_healthy() {
            let _ = self
                .cache
                .srem(&format!("active_rooms:{}", previous.room.cache_key()), &connection_id.to_string())
                .await;
        }
        let _ = sqlx::query("DELETE FROM active_connections WHERE connection_id = $1")
            .bind(connection_id)
            .execute(&self.pool)
            .await;
    }

    /// Emission algorithm for `spot_update`: a `false` (taken) update
    /// reaches only subscribers whose session window overlaps `window`; a
    /// `true` (freed) update is delivered to the whole room regardless of
    /// interval, since any watcher might now want to book it.
    pub async fn emit_spot_update(&self, room: RoomKey, spot_id: Uuid, available: bool, window: Option<(u16, u16)>) {
        let rooms = self.rooms.read().await;
        let Some(subscribers) = rooms.get(&room) else { return };
        for subscriber in subscribers.values() {
            let should_send = if available {
                true
            } else {
                match window {
                    Some((start, end)) => overlaps(subscriber.start_minutes, subscriber.end_minutes, start, end),
                    None => true,
                }
            };
            if should_send {
                let _ = subscriber.sender.send(ServerEvent::SpotUpdate { spot_id, available });
            }
        }
    }

    pub async fn send_to(&self, connection_id: Uuid, frame: ServerEvent) {
        let room = self.locations.read().await.get(&connection_id).map(|location| location.room);
        let Some(room) = room else { return };
        let rooms = self.rooms.read().await;
        if let Some(subscriber) = rooms.get(&room).and_then(|subscribers| subscribers.get(&connection_id)) {
            let _ = subscriber.sender.send(frame);
        }
    }

    /// Fan a `payment_complete` event out to every open connection acting
    /// as `user_id`, so a payment confirmed on one socket is reflected on
    /// any other the same user has open.
    pub async fn notify_payment_complete(&self, user_id: Uuid) {
        let connection_ids: Vec<Uuid> = {
            let user_connections = self.user_connections.read().await;
            user_connections.get(&user_id).map(|connections| connections.iter().copied().collect()).unwrap_or_default()
        };
        for connection_id in connection_ids {
            self.send_to(connection_id, ServerEvent::PaymentComplete {}).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert_fallback_row(
        &self,
        connection_id: Uuid,
        user_id: Option<Uuid>,
        room: RoomKey,
        start_minutes: u16,
        end_minutes: u16,
        reservation_id: Option<Uuid>,
    ) {
        let expires_at = Utc::now() + ChronoDuration::minutes(FALLBACK_CONNECTION_TTL_MINUTES);
        let _ = sqlx::query(
            r#"
INSERT INTO active_connections (connection_id, user_id, lot_id, date, start_minutes, end_minutes, reservation_id, expires_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (connection_id) DO UPDATE SET
  lot_id = EXCLUDED.lot_id, date = EXCLUDED.date, start_minutes = EXCLUDED.start_minutes,
  end_minutes = EXCLUDED.end_minutes, reservation_id = EXCLUDED.reservation_id, expires_at = EXCLUDED.expires_at
"#,
        )
        .bind(connection_id)
        .bind(user_id)
        .bind(room.lot_id)
        .bind(room.date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .bind(reservation_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use parkcore_core::lease::memory_cache::InMemoryCoordinationCache;

    // Postgres-backed: skipped unless `PARKCORE_TEST_DATABASE_URL` is set,
    // mirroring crates/parkcore-core/tests/coordinator.rs.
    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../parkcore-server/src/db/migrations");

    async fn test_pool() -> Option<PgPool> {
        let database_url = std::env::var("PARKCORE_TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.expect("test postgres pool should connect");
        MIGRATOR.run(&pool).await.expect("migrations should apply");
        Some(pool)
    }

    fn room() -> RoomKey {
        RoomKey::new(Uuid::new_v4(), NaiveDate::from_ymd_opt(2025, 9, 15).unwrap())
    }

    #[tokio::test]
    async fn subscriber_with_overlapping_window_receives_taken_update() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };
        let cache = Arc::new(InMemoryCoordinationCache::new());
        let breaker = Arc::new(CacheBreaker::new());
        let registry = RoomRegistry::new(cache, breaker, pool);
        let room = room();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        registry.subscribe(connection_id, tx, None, room, 10 * 60, 12 * 60).await;

        let spot_id = Uuid::new_v4();
        registry.emit_spot_update(room, spot_id, false, Some((11 * 60, 13 * 60))).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, ServerEvent::SpotUpdate { spot_id, available: false });
    }

    #[tokio::test]
    async fn subscriber_without_overlap_receives_nothing_on_taken_update() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };
        let cache = Arc::new(InMemoryCoordinationCache::new());
        let breaker = Arc::new(CacheBreaker::new());
        let registry = RoomRegistry::new(cache, breaker, pool);
        let room = room();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        registry.subscribe(connection_id, tx, None, room, 9 * 60, 10 * 60).await;

        let spot_id = Uuid::new_v4();
        registry.emit_spot_update(room, spot_id, false, Some((11 * 60, 13 * 60))).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn payment_complete_reaches_every_connection_of_the_same_user() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };
        let cache = Arc::new(InMemoryCoordinationCache::new());
        let breaker = Arc::new(CacheBreaker::new());
        let registry = RoomRegistry::new(cache, breaker, pool);
        let user_id = Uuid::new_v4();
        let other_room = RoomKey::new(Uuid::new_v4(), NaiveDate::from_ymd_opt(2025, 9, 16).unwrap());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let connection_a = Uuid::new_v4();
        registry.subscribe(connection_a, tx_a, Some(user_id), room(), 9 * 60, 10 * 60).await;

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let connection_b = Uuid::new_v4();
        registry.subscribe(connection_b, tx_b, Some(user_id), other_room, 9 * 60, 10 * 60).await;

        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        registry.subscribe(Uuid::new_v4(), tx_other, Some(Uuid::new_v4()), room(), 9 * 60, 10 * 60).await;

        registry.notify_payment_complete(user_id).await;

        assert_eq!(rx_a.recv().await.unwrap(), ServerEvent::PaymentComplete {});
        assert_eq!(rx_b.recv().await.unwrap(), ServerEvent::PaymentComplete {});
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_prunes_the_user_connection_index() {
        let Some(pool) = test_pool().await else {
            eprintln!("skipping: set PARKCORE_TEST_DATABASE_URL to run postgres integration tests");
            return;
        };
        let cache = Arc::new(InMemoryCoordinationCache::new());
        let breaker = Arc::new(CacheBreaker::new());
        let registry = RoomRegistry::new(cache, breaker, pool);
        let user_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        registry.subscribe(connection_id, tx, Some(user_id), room(), 9 * 60, 10 * 60).await;

        registry.disconnect(connection_id).await;
        registry.notify_payment_complete(user_id).await;
        // No subscriber left to receive on; the only assertion available
        // here is that this does not panic on a dangling index entry.
    }
}
