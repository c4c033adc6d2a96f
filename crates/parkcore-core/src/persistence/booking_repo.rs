use chrono::NaiveDate;
use parkcore_common::{AmountMinorUnits, Booking};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::CoreResult;

/// Confirmed-booking storage and the I1 conflict check. Callers that need
/// the row lock (booking coordinator confirmation) drive a transaction
/// themselves and pass it through `*_tx` methods; read-only callers
/// (availability service) use the pool directly.
pub struct BookingRepo {
    pool: PgPool,
}

impl BookingRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Row-lock the spot, blocking concurrent confirmations on the same
    /// spot until this transaction commits or rolls back. The Spot
    /// row itself is immutable reference data; `FOR UPDATE` is used purely
    /// as a mutex, not because the row's contents change.
    pub async fn lock_spot(tx: &mut Transaction<'_, Postgres>, spot_id: Uuid) -> CoreResult<()> {
        sqlx::query("SELECT spot_id FROM spots WHERE spot_id = $1 FOR UPDATE")
            .bind(spot_id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(())
    }

    /// Count of confirmed bookings on `(spot_id, date)` overlapping
    /// `[start, end)`, used to re-check I1 under the spot lock.
    pub async fn count_overlapping_tx(
        tx: &mut Transaction<'_, Postgres>,
        spot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
    ) -> CoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*) FROM bookings
WHERE spot_id = $1 AND date = $2 AND start_minutes < $4 AND end_minutes > $3
"#,
        )
        .bind(spot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    pub async fn insert_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        lot_id: Uuid,
        spot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
        amount: AmountMinorUnits,
    ) -> CoreResult<Booking> {
        let booking_id = Uuid::new_v4();
        let created_at = chrono::Utc::now();
        sqlx::query(
            r#"
INSERT INTO bookings
  (booking_id, user_id, lot_id, spot_id, date, start_minutes, end_minutes, amount_minor_units, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#,
        )
        .bind(booking_id)
        .bind(user_id)
        .bind(lot_id)
        .bind(spot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .bind(amount.0)
        .bind(created_at)
        .execute(&mut **tx)
        .await?;

        Ok(Booking {
            booking_id,
            user_id,
            lot_id,
            spot_id,
            date,
            start_minutes,
            end_minutes,
            amount,
            created_at,
        })
    }

    /// Used by the availability service: does any confirmed booking
    /// overlap `[start, end)` on this `(spot, date)`?
    pub async fn has_overlap(
        &self,
        spot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
    ) -> CoreResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*) FROM bookings
WHERE spot_id = $1 AND date = $2 AND start_minutes < $4 AND end_minutes > $3
"#,
        )
        .bind(spot_id)
        .bind(date)
        .bind(start_minutes as i32)
        .bind(end_minutes as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Batch overlap lookup for an entire lot/date, used by
    /// `AvailabilityService::check_lot` to avoid one query per spot.
    pub async fn overlapping_spot_ids(
        &self,
        lot_id: Uuid,
        date: NaiveDate,
        start_minutes: u16,
        end_minutes: u16,
    ) -> CoreResult<Vec<Uuid>> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
SELECT DISTINCT spot_id FROM bookings
WHERE lot_id = $1 AND date = $2 AND start_minutes < $4 AND end_minutes > $3
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
}
