use async_trait::async_trait;

use crate::error::CoreResult;

/// The coordination cache (CC): an atomic key-value store with TTLs,
/// conditional writes and a set type, used for lease guards, lease
/// metadata and room memberships.
///
/// Every method is fallible and the lease manager treats any error as a
/// transient cache failure (fail-closed). Implementations must not
/// swallow errors internally — the booking coordinator needs to observe
/// failures to drive the circuit breaker.
#[async_trait]
pub trait CoordinationCache: Send + Sync {
    /// Health probe used by the circuit breaker's recovery loop.
    async fn ping(&self) -> CoreResult<()>;

    /// `SET key value NX EX ttl`. Returns `true` iff the key was absent and
    /// is now set to `value`.
    async fn acquire(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool>;

    /// Compare-and-expire: extend `key`'s TTL only if its current value is
    /// `value`.
    async fn renew(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool>;

    /// Compare-and-delete: remove `key` only if its current value is
    /// `value`.
    async fn release(&self, key: &str, value: &str) -> CoreResult<bool>;

    /// Plain value read, or `None` if absent.
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Unconditional write with a TTL, used for lease metadata.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<()>;

    /// Extend an existing key's TTL unconditionally (used to bump
    /// LeaseMetadata into the payment-context grace window).
    async fn expire(&self, key: &str, ttl_secs: u64) -> CoreResult<()>;

    /// Unconditional delete; a no-op if the key is absent.
    async fn delete(&self, key: &str) -> CoreResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> CoreResult<()>;
    async fn srem(&self, key: &str, member: &str) -> CoreResult<()>;
    async fn smembers(&self, key: &str) -> CoreResult<Vec<String>>;

    /// Non-blocking key enumeration (cursor-based `SCAN`, never `KEYS`).
    async fn scan_keys(&self, pattern: &str) -> CoreResult<Vec<String>>;
}
