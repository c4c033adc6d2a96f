use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::error::{CoreError, CoreResult};
use crate::lease::cache::CoordinationCache;

/// `SET key value NX EX ttl` — nil reply means another writer won the race.
const ACQUIRE_SCRIPT: &str = r#"
return redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2])
"#;

/// Compare-and-expire.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Compare-and-delete.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// `CoordinationCache` backed by Redis (or a Redis-protocol-compatible
/// store). Acquire/renew/release are single round-trip Lua scripts so the
/// compare-and-act semantics hold even with a connection pool fronted by
/// `ConnectionManager`.
pub struct RedisCoordinationCache {
    manager: ConnectionManager,
    acquire_script: Script,
    renew_script: Script,
    release_script: Script,
}

impl RedisCoordinationCache {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(redis_url).map_err(CoreError::Cache)?;
        let manager = ConnectionManager::new(client).await.map_err(CoreError::Cache)?;
        Ok(Self::new(manager))
    }
}

#[async_trait]
impl CoordinationCache for RedisCoordinationCache {
    async fn ping(&self) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(CoreError::Cache)?;
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .acquire_script
            .key(key)
            .arg(value)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(CoreError::Cache)?;
        Ok(reply.is_some())
    }

    async fn renew(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool> {
        let mut conn = self.manager.clone();
        let reply: i64 = self
            .renew_script
            .key(key)
            .arg(value)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(CoreError::Cache)?;
        Ok(reply == 1)
    }

    async fn release(&self, key: &str, value: &str) -> CoreResult<bool> {
        let mut conn = self.manager.clone();
        let reply: i64 = self
            .release_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(CoreError::Cache)?;
        Ok(reply == 1)
    }

    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(CoreError::Cache)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await.map_err(CoreError::Cache)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.expire(key, ttl_secs as i64).await.map_err(CoreError::Cache)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(CoreError::Cache)?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.sadd(key, member).await.map_err(CoreError::Cache)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> CoreResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.srem(key, member).await.map_err(CoreError::Cache)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.smembers(key).await.map_err(CoreError::Cache)
    }

    async fn scan_keys(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let mut conn = self.manager.clone();
        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<'_, String> =
            conn.scan_match(pattern).await.map_err(CoreError::Cache)?;
        use futures_util::StreamExt;
        while let Some(key) = iter.next().await {
            keys.push(key);
        }
        Ok(keys)
    }
}
