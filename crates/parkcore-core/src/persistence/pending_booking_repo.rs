use chrono::{Duration, NaiveDate, Utc};
use parkcore_common::{AmountMinorUnits, PendingBooking};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::CoreResult;

/// Direct-path TTL: 4 minutes (`pending_bookings_db.py`'s
/// `expires_at = now + timedelta(minutes=4)`).
pub const PENDING_BOOKING_TTL_MINUTES: i64 = 4;

pub struct PendingBookingRepo {
    pool: PgPool,
}

impl PendingBookingRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Any pending booking (authored by anyone) overlapping `[start, end)`
    /// on `(spot_id, date)`.
    pub async fn has_overlap_tx(
        tx: &mut Transaction<'_, Postgres>,
        spot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
    ) -> CoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*) FROM pending_bookings
WHERE spot_id = $1 AND date = $2 AND start_minutes < $4 AND end_minutes > $3 AND expires_at > now()
"#,
        )
        .bind(spot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count > 0)
    }

    /// Same overlap check, excluding one reservation id (used on the
    /// direct path's confirmation re-check).
    pub async fn has_overlap_excluding_tx(
        tx: &mut Transaction<'_, Postgres>,
        spot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
        excluding: Uuid,
    ) -> CoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*) FROM pending_bookings
WHERE spot_id = $1 AND date = $2 AND start_minutes < $4 AND end_minutes > $3
  AND expires_at > now() AND reservation_id <> $5
"#,
        )
        .bind(spot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .bind(excluding)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count > 0)
    }

    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: Uuid,
        user_id: Uuid,
        lot_id: Uuid,
        spot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
        amount: AmountMinorUnits,
    ) -> CoreResult<PendingBooking> {
        let created_at = Utc::now();
        let expires_at = created_at + Duration::minutes(PENDING_BOOKING_TTL_MINUTES);
        sqlx::query(
            r#"
INSERT INTO pending_bookings
  (reservation_id, user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount_minor_units, created_at, expires_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#,
        )
        .bind(reservation_id)
        .bind(user_id)
        .bind(lot_id)
        .bind(spot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .bind(amount.0)
        .bind(created_at)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;

        Ok(PendingBooking {
            reservation_id,
            user_id,
            lot_id,
            spot_id,
            date,
            start_minutes,
            end_minutes,
            amount,
            created_at,
            expires_at,
        })
    }

    pub async fn delete_tx(tx: &mut Transaction<'_, Postgres>, reservation_id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM pending_bookings WHERE reservation_id = $1")
            .bind(reservation_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, reservation_id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM pending_bookings WHERE reservation_id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Used by availability: pending-overlap mask for an entire lot/date.
    pub async fn overlapping_spot_ids(
        &self,
        lot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
    ) -> CoreResult<Vec<Uuid>> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
SELECT DISTINCT spot_id FROM pending_bookings
WHERE lot_id = $1 AND date = $2 AND start_minutes < $4 AND end_minutes > $3 AND expires_at > now()
"#,
        )
        .bind(lot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Sweep: delete everything past its TTL, returning the rows deleted
    /// so the caller can emit `spot_update{available:true}` for each.
    pub async fn delete_expired(&self) -> CoreResult<Vec<PendingBooking>> {
        let rows: Vec<(Uuid, Uuid, Uuid, Uuid, NaiveDate, i32, i32, i64, chrono::DateTime<Utc>, chrono::DateTime<Utc>)> =
            sqlx::query_as(
                r#"
DELETE FROM pending_bookings WHERE expires_at <= now()
RETURNING reservation_id, user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount_minor_units, created_at, expires_at
"#,
            )
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(reservation_id, user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount, created_at, expires_at)| {
                    PendingBooking {
                        reservation_id,
                        user_id,
                        lot_id,
                        spot_id,
                        date,
                        start_minutes: start_minutes as u16,
                        end_minutes: end_minutes as u16,
                        amount: AmountMinorUnits(amount),
                        created_at,
                        expires_at,
                    }
                },
            )
            .collect())
    }

    /// Recent inserts (within `lookback`) for the cross-instance poller,
    /// which re-derives "taken" emissions other instances should already
    /// know about.
    pub async fn recent(&self, lookback: Duration) -> CoreResult<Vec<PendingBooking>> {
        let since = Utc::now() - lookback;
        let rows: Vec<(Uuid, Uuid, Uuid, Uuid, NaiveDate, i32, i32, i64, chrono::DateTime<Utc>, chrono::DateTime<Utc>)> =
            sqlx::query_as(
                r#"
SELECT reservation_id, user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount_minor_units, created_at, expires_at
FROM pending_bookings WHERE created_at >= $1
"#,
            )
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(reservation_id, user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount, created_at, expires_at)| {
                    PendingBooking {
                        reservation_id,
                        user_id,
                        lot_id,
                        spot_id,
                        date,
                        start_minutes: start_minutes as u16,
                        end_minutes: end_minutes as u16,
                        amount: AmountMinorUnits(amount),
                        created_at,
                        expires_at,
                    }
                },
            )
            .collect())
    }
}
