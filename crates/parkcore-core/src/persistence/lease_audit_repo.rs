use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreResult;

/// Append-only backstop for lease expiry, mirroring the original's
/// `spot_leases` table (`misc/lease_worker.py`). Not authoritative: CC
/// remains the source of truth for whether a lease is active. This table
/// exists purely so the sweep can reconcile leases CC's (at-most-once)
/// expiry notification missed.
pub struct LeaseAuditRepo {
    pool: PgPool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseAuditRow {
    pub spot_id: Uuid,
    pub booking_date: NaiveDate,
    pub reservation_id: Uuid,
    pub held_until: DateTime<Utc>,
}

impl LeaseAuditRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Recorded at acquire time, alongside (not instead of) the CC write.
    pub async fn record(
        &self,
        spot_id: Uuid,
        booking_date: NaiveDate,
        reservation_id: Uuid,
        held_until: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO lease_audit (spot_id, booking_date, reservation_id, held_until, processed)
VALUES ($1, $2, $3, $4, false)
ON CONFLICT (spot_id, booking_date) DO UPDATE
SET reservation_id = EXCLUDED.reservation_id, held_until = EXCLUDED.held_until, processed = false
"#,
        )
        .bind(spot_id)
        .bind(booking_date)
        .bind(reservation_id)
        .bind(held_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marked processed on owner-scoped release, so the sweep below does
    /// not re-emit a "freed" event for a lease that ended normally.
    pub async fn mark_processed(&self, spot_id: Uuid, booking_date: NaiveDate, reservation_id: Uuid) -> CoreResult<()> {
        sqlx::query(
            "UPDATE lease_audit SET processed = true \
             WHERE spot_id = $1 AND booking_date = $2 AND reservation_id = $3",
        )
        .bind(spot_id)
        .bind(booking_date)
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rows overdue and not yet processed, claimed with `FOR UPDATE SKIP
    /// LOCKED` so multiple server instances can run the sweep concurrently
    /// without double-emitting, per the original `lease_worker.py`.
    pub async fn claim_overdue(&self, limit: i64) -> CoreResult<Vec<LeaseAuditRow>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(Uuid, NaiveDate, Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
SELECT spot_id, booking_date, reservation_id, held_until FROM lease_audit
WHERE held_until < now() AND processed = false
ORDER BY held_until
LIMIT $1
FOR UPDATE SKIP LOCKED
"#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let reservation_ids: Vec<Uuid> = rows.iter().map(|(_, _, reservation_id, _)| *reservation_id).collect();
        sqlx::query("UPDATE lease_audit SET processed = true WHERE reservation_id = ANY($1)")
            .bind(&reservation_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(spot_id, booking_date, reservation_id, held_until)| LeaseAuditRow {
                spot_id,
                booking_date,
                reservation_id,
                held_until,
            })
            .collect())
    }
}
