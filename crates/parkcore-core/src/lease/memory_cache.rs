use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::lease::cache::CoordinationCache;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process fake of the coordination cache, for unit and property tests.
/// Expiry is checked lazily on read, matching how a real TTL store behaves
/// from the caller's point of view.
#[derive(Default)]
pub struct InMemoryCoordinationCache {
    strings: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryCoordinationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let mut guard = self.strings.lock().unwrap();
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CoordinationCache for InMemoryCoordinationCache {
    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn acquire(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool> {
        // Check-and-insert under a single lock acquisition: releasing the
        // lock between the liveness check and the insert would let two
        // concurrent callers both observe an absent key and both win.
        let mut guard = self.strings.lock().unwrap();
        let is_live = matches!(guard.get(key), Some(entry) if entry.expires_at > Instant::now());
        if is_live {
            return Ok(false);
        }
        guard.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + Duration::from_secs(ttl_secs) },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<bool> {
        let mut guard = self.strings.lock().unwrap();
        match guard.get_mut(key) {
            Some(entry) if entry.value == value && entry.expires_at > Instant::now() => {
                entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, value: &str) -> CoreResult<bool> {
        let mut guard = self.strings.lock().unwrap();
        match guard.get(key) {
            Some(entry) if entry.value == value => {
                guard.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.get_live(key))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> CoreResult<()> {
        let mut guard = self.strings.lock().unwrap();
        guard.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + Duration::from_secs(ttl_secs) },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> CoreResult<()> {
        let mut guard = self.strings.lock().unwrap();
        if let Some(entry) = guard.get_mut(key) {
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.strings.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> CoreResult<()> {
        self.sets.lock().unwrap().entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> CoreResult<()> {
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> CoreResult<Vec<String>> {
        Ok(self.sets.lock().unwrap().get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn scan_keys(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .strings
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.expires_at > Instant::now())
            .map(|(key, _)| key.clone())
            .collect())
    }
}
