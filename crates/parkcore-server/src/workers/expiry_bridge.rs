// Bridges `parkcore_core::lease::ExpiryListener`'s channel to the realtime
// hub: each `LeaseExpired` decodes to the `(spot, date)` whose guard key
// just vanished from the coordination cache, and the freed spot gets a
// `spot_update{available:true}` to its room. By the time a guard key
// expires its LeaseMetadata is long gone too, so the original booking
// window is unknown here; the emission carries no window and is
// delivered unconditionally, same as a full-lot refresh.

use std::sync::Arc;

use parkcore_common::RoomKey;
use parkcore_core::lease::cache::CoordinationCache;
use parkcore_core::lease::LeaseExpired;
use tokio::sync::mpsc;
use tracing::warn;

use crate::reference_data::ReferenceDataRepo;
use crate::ws::room::RoomRegistry;

pub struct ExpiryBridge<C: CoordinationCache> {
    rooms: Arc<RoomRegistry<C>>,
    reference_data: Arc<ReferenceDataRepo>,
}

impl<C: CoordinationCache> ExpiryBridge<C> {
    pub fn new(rooms: Arc<RoomRegistry<C>>, reference_data: Arc<ReferenceDataRepo>) -> Self {
        Self { rooms, reference_data }
    }

    pub async fn run(self, mut expirations: mpsc::UnboundedReceiver<LeaseExpired>) {
        while let Some(expired) = expirations.recv().await {
            let Some((spot_id, date)) = expired.spot_and_date() else {
                warn!(key = %expired.key, "could not decode expired lease guard key");
                continue;
            };
            let spot = match self.reference_data.spot(spot_id).await {
                Ok(Some(spot)) => spot,
                Ok(None) => {
                    warn!(%spot_id, "expired lease guard referenced an unknown spot");
                    continue;
                }
                Err(err) => {
                    warn!(%err, %spot_id, "failed to look up spot for expired lease guard");
                    continue;
                }
            };
            let room = RoomKey::new(spot.lot_id, date);
            self.rooms.emit_spot_update(room, spot_id, true, None).await;
        }
    }
}
