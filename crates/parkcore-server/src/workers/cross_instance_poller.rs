// Polls for pending bookings created on other server instances in the
// last few seconds and re-emits the `spot_update{available:false}` a
// sibling instance's own in-process room delivery could never reach,
// since each instance only holds the sockets it itself accepted. Mirrors
// `CrossInstanceManager._poll_database`'s 3-second interval / 5-second
// lookback and its dedup-by-id set, bounded here so it cannot grow
// forever across a long-running process.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use parkcore_common::RoomKey;
use parkcore_core::lease::cache::CoordinationCache;
use parkcore_core::persistence::PendingBookingRepo;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::ws::room::RoomRegistry;

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const LOOKBACK: ChronoDuration = ChronoDuration::seconds(5);
/// Bounds the dedup set so a long-running instance does not accumulate an
/// unbounded history of reservation ids it has already re-emitted.
const MAX_TRACKED_IDS: usize = 10_000;

pub struct CrossInstancePoller<C: CoordinationCache> {
    pending: Arc<PendingBookingRepo>,
    rooms: Arc<RoomRegistry<C>>,
}

impl<C: CoordinationCache> CrossInstancePoller<C> {
    pub fn new(pending: Arc<PendingBookingRepo>, rooms: Arc<RoomRegistry<C>>) -> Self {
        Self { pending, rooms }
    }

    pub async fn run(self, cancellation: CancellationToken) {
        info!("cross-instance poller started");
        let mut seen: HashSet<Uuid> = HashSet::new();

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("cross-instance poller shutting down");
                    return;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let recent = match self.pending.recent(LOOKBACK).await {
                Ok(recent) => recent,
                Err(err) => {
                    error!(%err, "cross-instance poll failed");
                    continue;
                }
            };

            for booking in recent {
                if !seen.insert(booking.reservation_id) {
                    continue;
                }
                let room = RoomKey::new(booking.lot_id, booking.date);
                self.rooms
                    .emit_spot_update(
                        room,
                        booking.spot_id,
                        false,
                        Some((booking.start_minutes, booking.end_minutes)),
                    )
                    .await;
            }

            if seen.len() > MAX_TRACKED_IDS {
                seen.clear();
            }
        }
    }
}
