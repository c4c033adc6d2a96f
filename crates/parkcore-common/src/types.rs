// Core data model. Plain, serializable structs — no behavior lives here,
// only shape. Mutation and invariant enforcement is the job of
// parkcore-core's lease manager / booking coordinator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Amount in minor currency units (e.g. cents). Always a positive integer;
/// the payment provider contract requires a minimum of 50.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AmountMinorUnits(pub i64);

impl AmountMinorUnits {
    pub const MINIMUM: AmountMinorUnits = AmountMinorUnits(50);

    pub fn is_valid(self) -> bool {
        self >= Self::MINIMUM
    }
}

/// Immutable in this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub spot_id: Uuid,
    pub lot_id: Uuid,
    pub spot_number: String,
    pub svg_coords: String,
    pub price_per_hour: AmountMinorUnits,
}

/// Immutable in this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: Uuid,
    pub city_id: Uuid,
    pub name: String,
    pub lat: f64,
    pub long: f64,
    pub address: String,
    pub image_filename: String,
}

/// A confirmed booking. Invariant I1: no two Bookings share `(spot_id,
/// date)` with overlapping `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub lot_id: Uuid,
    pub spot_id: Uuid,
    pub date: NaiveDate,
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub amount: AmountMinorUnits,
    pub created_at: DateTime<Utc>,
}

/// Direct-path analog of a lease, stored in PS when the cache is down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBooking {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub lot_id: Uuid,
    pub spot_id: Uuid,
    pub date: NaiveDate,
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub amount: AmountMinorUnits,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Lease metadata stored alongside the CC guard key (`lease_data:{id}`).
/// Invariant I3: every present lease has a matching LeaseMetadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseMetadata {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub lot_id: Uuid,
    pub spot_id: Uuid,
    pub date: NaiveDate,
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub created_at: DateTime<Utc>,
    pub payment_context: bool,
    pub payment_session_id: Option<String>,
}

/// Memoized outcome of a `confirm` call, keyed by idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub result: ConfirmOutcome,
    pub created_at: DateTime<Utc>,
}

/// The stable, byte-identical outcome a given idempotency key always
/// returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Success { booking_id: Uuid },
    Failed { reason: String },
}

/// Per-connection session data. CC-primary; PS-backed `ActiveConnection`
/// row is the fallback when CC is unhealthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub connection_id: Uuid,
    pub user_id: Option<Uuid>,
    pub room: Option<RoomKey>,
    pub start_minutes: Option<u16>,
    pub end_minutes: Option<u16>,
    pub reservation_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// Subscription room identity: `(lot_id, date)`. Carried as typed fields,
/// never re-parsed from a joined string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomKey {
    pub lot_id: Uuid,
    pub date: NaiveDate,
}

impl RoomKey {
    pub fn new(lot_id: Uuid, date: NaiveDate) -> Self {
        Self { lot_id, date }
    }

    /// Cache-keyspace representation, e.g. for `active_rooms:{room}`. Uses a
    /// colon delimiter, which cannot appear in a numeric/UUID lot id or an
    /// ISO date, so the key can always be split back unambiguously.
    pub fn cache_key(&self) -> String {
        format!("lot:{}:{}", self.lot_id, self.date)
    }
}

/// CC lease guard key: `spot_lease:{spot_id}_{date}`.
pub fn lease_guard_key(spot_id: Uuid, date: NaiveDate) -> String {
    format!("spot_lease:{spot_id}_{date}")
}

/// CC lease metadata key: `lease_data:{reservation_id}`.
pub fn lease_metadata_key(reservation_id: Uuid) -> String {
    format!("lease_data:{reservation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_key_cache_key_uses_colon_delimiter() {
        let lot_id = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
        let room = RoomKey::new(lot_id, date);
        assert_eq!(room.cache_key(), format!("lot:{lot_id}:2025-09-15"));
    }

    #[test]
    fn amount_minimum_validation() {
        assert!(AmountMinorUnits(50).is_valid());
        assert!(!AmountMinorUnits(49).is_valid());
        assert!(AmountMinorUnits(1_000).is_valid());
    }
}
