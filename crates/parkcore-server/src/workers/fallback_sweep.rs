// Reaps stale `active_connections` rows: the DB fallback written in place
// of the coordination-cache room mirror while the breaker is degraded.
// These rows are never authoritative for in-process delivery (the
// `RoomRegistry`'s own map is), so the sweep just needs to keep the table
// from growing unbounded when a connection drops without a clean
// `disconnect`.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct FallbackSweep {
    pool: PgPool,
}

impl FallbackSweep {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run(self, cancellation: CancellationToken) {
        info!("fallback connection sweep started");
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("fallback connection sweep shutting down");
                    return;
                }
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }

            match sqlx::query("DELETE FROM active_connections WHERE expires_at <= now()").execute(&self.pool).await {
                Ok(result) if result.rows_affected() > 0 => {
                    info!(count = result.rows_affected(), "swept stale fallback connection rows");
                }
                Ok(_) => {}
                Err(err) => error!(%err, "fallback connection sweep failed"),
            }
        }
    }
}
