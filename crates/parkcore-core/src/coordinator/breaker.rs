use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lease::cache::CoordinationCache;

/// Process-wide coordination-cache health. The booking coordinator
/// consults this before each attempt; the lease manager must not be
/// consulted while `Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Healthy,
    Degraded,
}

impl BreakerState {
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Recovery-probe cadence: re-check cache health every 30 seconds while
/// degraded.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Atomic health flag plus the periodic probe that flips it back to
/// `Healthy`. Starts `Healthy`; any cache error observed by a caller
/// should `trip()` it, and the probe task is the only writer that clears
/// it back.
pub struct CacheBreaker {
    state: ArcSwap<BreakerState>,
}

impl CacheBreaker {
    pub fn new() -> Self {
        Self { state: ArcSwap::from_pointee(BreakerState::Healthy) }
    }

    pub fn state(&self) -> BreakerState {
        **self.state.load()
    }

    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    /// Called by any caller that observes a cache error mid-flight.
    pub fn trip(&self) {
        if self.state() != BreakerState::Degraded {
            warn!("coordination cache marked degraded");
        }
        self.state.store(Arc::new(BreakerState::Degraded));
    }

    fn recover(&self) {
        if self.state() != BreakerState::Healthy {
            info!("coordination cache recovered, resuming leased path");
        }
        self.state.store(Arc::new(BreakerState::Healthy));
    }
}

impl Default for CacheBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that pings the cache every 30s and closes the breaker
/// on success. Never opens the breaker itself; only a failed live call
/// (via `trip`) does that.
pub struct CacheHealthProbe<C: CoordinationCache> {
    cache: Arc<C>,
    breaker: Arc<CacheBreaker>,
}

impl<C: CoordinationCache> CacheHealthProbe<C> {
    pub fn new(cache: Arc<C>, breaker: Arc<CacheBreaker>) -> Self {
        Self { cache, breaker }
    }

    pub async fn run(self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
            }

            if self.breaker.is_healthy() {
                continue;
            }

            match self.cache.ping().await {
                Ok(()) => self.breaker.recover(),
                Err(err) => warn!(%err, "cache recovery probe failed, remaining degraded"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_and_trips_on_demand() {
        let breaker = CacheBreaker::new();
        assert!(breaker.is_healthy());
        breaker.trip();
        assert!(!breaker.is_healthy());
    }

    #[test]
    fn recover_closes_the_breaker() {
        let breaker = CacheBreaker::new();
        breaker.trip();
        breaker.recover();
        assert!(breaker.is_healthy());
    }
}
