pub mod cache;
pub mod expiry;
pub mod manager;
pub mod memory_cache;
pub mod redis_cache;

pub use cache::CoordinationCache;
pub use expiry::{ExpiryListener, LeaseExpired};
pub use manager::{AcquireRequest, LeaseManager, DEFAULT_LEASE_TTL_SECS, PAYMENT_CONTEXT_TTL_SECS};
pub use memory_cache::InMemoryCoordinationCache;
pub use redis_cache::RedisCoordinationCache;
