// Read-only lookups against the immutable lot/spot reference data. Plain
// queries, no booking logic — that lives in parkcore-core.

use parkcore_common::{AmountMinorUnits, Lot, Spot};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct ReferenceDataRepo {
    pool: PgPool,
}

impl ReferenceDataRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn spot(&self, spot_id: Uuid) -> sqlx::Result<Option<Spot>> {
        sqlx::query_as::<_, SpotRow>(
            "SELECT spot_id, lot_id, spot_number, svg_coords, price_per_hour_minor_units FROM spots WHERE spot_id = $1",
        )
        .bind(spot_id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Into::into))
    }

    pub async fn spots_for_lot(&self, lot_id: Uuid) -> sqlx::Result<Vec<Spot>> {
        let rows = sqlx::query_as::<_, SpotRow>(
            "SELECT spot_id, lot_id, spot_number, svg_coords, price_per_hour_minor_units FROM spots WHERE lot_id = $1 ORDER BY spot_number",
        )
        .bind(lot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn lot(&self, lot_id: Uuid) -> sqlx::Result<Option<Lot>> {
        sqlx::query_as::<_, LotRow>(
            "SELECT lot_id, city_id, name, lat, long, address, image_filename FROM lots WHERE lot_id = $1",
        )
        .bind(lot_id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(Into::into))
    }

    pub async fn lots_for_city(&self, city_id: Uuid) -> sqlx::Result<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(
            "SELECT lot_id, city_id, name, lat, long, address, image_filename FROM lots WHERE city_id = $1 ORDER BY name",
        )
        .bind(city_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct SpotRow {
    spot_id: Uuid,
    lot_id: Uuid,
    spot_number: String,
    svg_coords: String,
    price_per_hour_minor_units: i64,
}

impl From<SpotRow> for Spot {
    fn from(row: SpotRow) -> Self {
        Spot {
            spot_id: row.spot_id,
            lot_id: row.lot_id,
            spot_number: row.spot_number,
            svg_coords: row.svg_coords,
            price_per_hour: AmountMinorUnits(row.price_per_hour_minor_units),
        }
    }
}

#[derive(sqlx::FromRow)]
struct LotRow {
    lot_id: Uuid,
    city_id: Uuid,
    name: String,
    lat: f64,
    long: f64,
    address: String,
    image_filename: String,
}

impl From<LotRow> for Lot {
    fn from(row: LotRow) -> Self {
        Lot {
            lot_id: row.lot_id,
            city_id: row.city_id,
            name: row.name,
            lat: row.lat,
            long: row.long,
            address: row.address,
            image_filename: row.image_filename,
        }
    }
}

/// `price_per_hour * duration`, rounded up to the nearest minor unit so a
/// partial-hour booking is never under-charged.
pub fn amount_for_window(price_per_hour: AmountMinorUnits, start_minutes: u16, end_minutes: u16) -> AmountMinorUnits {
    let minutes = i64::from(end_minutes - start_minutes);
    let total = (price_per_hour.0 * minutes).div_ceil(60);
    AmountMinorUnits(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charges_pro_rated_amount_for_partial_hour() {
        let amount = amount_for_window(AmountMinorUnits(600), 10 * 60, 11 * 60 + 30);
        assert_eq!(amount, AmountMinorUnits(900));
    }

    #[test]
    fn rounds_up_to_avoid_under_charging() {
        let amount = amount_for_window(AmountMinorUnits(100), 0, 1);
        assert_eq!(amount, AmountMinorUnits(2));
    }
}
