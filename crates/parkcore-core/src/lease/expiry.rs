use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lease::cache::CoordinationCache;

/// A lease guard key's expiry, decoded enough to re-derive the
/// `(spot, date)` pair for the emission it should trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseExpired {
    pub key: String,
}

impl LeaseExpired {
    /// Decode `spot_lease:{spotId}_{date}` back into its parts. Neither a
    /// UUID nor an ISO date can contain an underscore, so the single
    /// remaining `_` unambiguously separates them.
    pub fn spot_and_date(&self) -> Option<(Uuid, NaiveDate)> {
        let rest = self.key.strip_prefix("spot_lease:")?;
        let (spot_id, date) = rest.split_once('_')?;
        Some((Uuid::parse_str(spot_id).ok()?, date.parse().ok()?))
    }
}

/// Polls the `spot_lease:*` keyspace on an interval and diffs the key set
/// against the previous poll to detect expiries, forwarding each one to a
/// channel the realtime hub drains. This is a scan-diff poller, not a
/// keyspace-notification subscription — the cache trait has no pub/sub
/// primitive. Falls back to nothing when the cache is down; the scheduled
/// pending-sweep worker is the correctness backstop regardless, since a
/// poll tick can miss a key that both expired and was reused between two
/// scans.
///
/// A single-responsibility task with no shared mutable state beyond the
/// stores: it owns no registry, it only relays.
pub struct ExpiryListener<C: CoordinationCache> {
    cache: Arc<C>,
    poll_interval: Duration,
}

impl<C: CoordinationCache> ExpiryListener<C> {
    pub fn new(cache: Arc<C>) -> Self {
        Self { cache, poll_interval: Duration::from_secs(2) }
    }

    /// Run until cancelled. On a transient cache error the listener exits;
    /// the circuit breaker's recovery probe is responsible for causing the
    /// caller to spawn a fresh listener once the cache is healthy again.
    pub async fn run(self, tx: mpsc::UnboundedSender<LeaseExpired>, cancellation: CancellationToken) {
        info!("lease expiry listener started");
        let mut known_keys: std::collections::HashSet<String> = match self.cache.scan_keys("spot_lease:*").await {
            Ok(keys) => keys.into_iter().collect(),
            Err(err) => {
                warn!(%err, "expiry listener could not seed known keys, exiting");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("lease expiry listener shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let current_keys: std::collections::HashSet<String> = match self.cache.scan_keys("spot_lease:*").await {
                Ok(keys) => keys.into_iter().collect(),
                Err(err) => {
                    error!(%err, "expiry listener lost the cache, exiting");
                    return;
                }
            };

            for expired in known_keys.difference(&current_keys) {
                if tx.send(LeaseExpired { key: expired.clone() }).is_err() {
                    return;
                }
            }
            known_keys = current_keys;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_spot_and_date_from_guard_key() {
        let spot_id = Uuid::new_v4();
        let expired = LeaseExpired { key: format!("spot_lease:{spot_id}_2025-09-15") };
        let (decoded_spot, decoded_date) = expired.spot_and_date().unwrap();
        assert_eq!(decoded_spot, spot_id);
        assert_eq!(decoded_date, NaiveDate::from_ymd_opt(2025, 9, 15).unwrap());
    }

    #[test]
    fn rejects_keys_without_the_expected_prefix() {
        let expired = LeaseExpired { key: "lease_data:deadbeef".to_string() };
        assert!(expired.spot_and_date().is_none());
    }
}
