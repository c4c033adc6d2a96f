use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the lease manager, booking coordinator and
/// availability service. `parkcore-server` maps these onto HTTP status
/// codes and WS `subscription_error` / `booking_failed` frames; this crate
/// stays transport-agnostic.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("spot {spot_id} is already leased or booked for the requested window")]
    SpotUnavailable { spot_id: Uuid },

    #[error("lease {reservation_id} not found or already expired")]
    LeaseNotFound { reservation_id: Uuid },

    #[error("lease {reservation_id} is held by a different reservation")]
    LeaseHolderMismatch { reservation_id: Uuid },

    #[error("requested window is invalid: start {start} >= end {end}")]
    InvalidWindow { start: u16, end: u16 },

    #[error("amount {0} is below the minimum chargeable amount")]
    AmountTooSmall(i64),

    #[error("coordination cache is unavailable, falling back to direct path")]
    CacheUnavailable,

    #[error("payment provider error: {0}")]
    Payment(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("idempotency key {key} was reused with a different request body")]
    IdempotencyConflict { key: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
