// Correctness backstop alongside the expiry bridge: claims `lease_audit`
// rows whose `held_until` has passed and were never marked processed by
// an owner-scoped release, and emits the freed update for each. Catches
// the case where the coordination cache's own expiry went unnoticed by
// the poll-based listener (e.g. the cache was unreachable for the whole
// window the guard was alive).

use std::sync::Arc;
use std::time::Duration;

use parkcore_common::RoomKey;
use parkcore_core::lease::cache::CoordinationCache;
use parkcore_core::persistence::LeaseAuditRepo;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::reference_data::ReferenceDataRepo;
use crate::ws::room::RoomRegistry;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const CLAIM_BATCH_SIZE: i64 = 100;

pub struct LeaseAuditSweep<C: CoordinationCache> {
    lease_audit: Arc<LeaseAuditRepo>,
    reference_data: Arc<ReferenceDataRepo>,
    rooms: Arc<RoomRegistry<C>>,
}

impl<C: CoordinationCache> LeaseAuditSweep<C> {
    pub fn new(lease_audit: Arc<LeaseAuditRepo>, reference_data: Arc<ReferenceDataRepo>, rooms: Arc<RoomRegistry<C>>) -> Self {
        Self { lease_audit, reference_data, rooms }
    }

    pub async fn run(self, cancellation: CancellationToken) {
        info!("lease audit sweep started");
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("lease audit sweep shutting down");
                    return;
                }
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }

            let overdue = match self.lease_audit.claim_overdue(CLAIM_BATCH_SIZE).await {
                Ok(rows) => rows,
                Err(err) => {
                    error!(%err, "lease audit sweep failed to claim overdue rows");
                    continue;
                }
            };

            for row in overdue {
                let spot = match self.reference_data.spot(row.spot_id).await {
                    Ok(Some(spot)) => spot,
                    Ok(None) => continue,
                    Err(err) => {
                        error!(%err, spot_id = %row.spot_id, "lease audit sweep could not resolve spot's lot");
                        continue;
                    }
                };
                let room = RoomKey::new(spot.lot_id, row.booking_date);
                self.rooms.emit_spot_update(room, row.spot_id, true, None).await;
            }
        }
    }
}
