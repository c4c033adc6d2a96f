// Periodic cleanup of expired direct-path pending bookings, emitting a
// freed `spot_update` for each one reaped. Mirrors the original's
// hourly `cleanup_expired_pending_bookings` job, tightened to a minute
// cadence since the pending-booking TTL itself is only 4 minutes.

use std::sync::Arc;
use std::time::Duration;

use parkcore_core::lease::cache::CoordinationCache;
use parkcore_core::persistence::PendingBookingRepo;
use parkcore_common::RoomKey;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ws::room::RoomRegistry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct PendingSweep<C: CoordinationCache> {
    pending: Arc<PendingBookingRepo>,
    rooms: Arc<RoomRegistry<C>>,
}

impl<C: CoordinationCache> PendingSweep<C> {
    pub fn new(pending: Arc<PendingBookingRepo>, rooms: Arc<RoomRegistry<C>>) -> Self {
        Self { pending, rooms }
    }

    pub async fn run(self, cancellation: CancellationToken) {
        info!("pending-booking sweep started");
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("pending-booking sweep shutting down");
                    return;
                }
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }

            match self.pending.delete_expired().await {
                Ok(expired) => {
                    if !expired.is_empty() {
                        info!(count = expired.len(), "swept expired pending bookings");
                    }
                    for booking in expired {
                        let room = RoomKey::new(booking.lot_id, booking.date);
                        self.rooms
                            .emit_spot_update(
                                room,
                                booking.spot_id,
                                true,
                                Some((booking.start_minutes, booking.end_minutes)),
                            )
                            .await;
                    }
                }
                Err(err) => error!(%err, "pending-booking sweep failed"),
            }
        }
    }
}
