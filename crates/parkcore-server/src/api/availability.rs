use axum::extract::State;
use axum::Json;
use chrono::NaiveDate;
use parkcore_core::coordinator::payment::PaymentProvider;
use parkcore_core::lease::cache::CoordinationCache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckSpotAvailabilityRequest {
    pub parking_lot_id: Uuid,
    pub booking_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize)]
pub struct SpotResponse {
    pub id: Uuid,
    pub spot_number: String,
    pub svg_coords: String,
    pub is_available: bool,
    pub price_per_hour: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckSpotAvailabilityResponse {
    pub image_filename: String,
    pub spots: Vec<SpotResponse>,
    pub booked_count: usize,
    pub leased_count: usize,
    pub redis_available: bool,
}

pub async fn check_spot_availability<C, P>(
    State(state): State<AppState<C, P>>,
    Json(request): Json<CheckSpotAvailabilityRequest>,
) -> Result<Json<CheckSpotAvailabilityResponse>, ApiError>
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    let window = parkcore_common::TimeWindow::from_hhmm(&request.start_time, &request.end_time)
        .map_err(|err| ApiError::new(crate::error::ErrorCode::ValidationFailed, err.to_string()))?;

    let lot = state
        .reference_data
        .lot(request.parking_lot_id)
        .await
        .map_err(|err| ApiError::new(crate::error::ErrorCode::InternalError, err.to_string()))?
        .ok_or_else(|| ApiError::new(crate::error::ErrorCode::NotFound, "unknown parking lot"))?;

    let spots = state
        .reference_data
        .spots_for_lot(request.parking_lot_id)
        .await
        .map_err(|err| ApiError::new(crate::error::ErrorCode::InternalError, err.to_string()))?;

    let availability = state
        .availability
        .check_lot(request.parking_lot_id, &spots, request.booking_date, window.start_minutes, window.end_minutes)
        .await?;

    let available_by_id: std::collections::HashMap<Uuid, bool> =
        availability.spots.iter().map(|entry| (entry.spot_id, entry.available)).collect();

    Ok(Json(CheckSpotAvailabilityResponse {
        image_filename: lot.image_filename,
        spots: spots
            .iter()
            .map(|spot| SpotResponse {
                id: spot.spot_id,
                spot_number: spot.spot_number.clone(),
                svg_coords: spot.svg_coords.clone(),
                is_available: *available_by_id.get(&spot.spot_id).unwrap_or(&true),
                price_per_hour: spot.price_per_hour.0,
            })
            .collect(),
        booked_count: availability.booked_count,
        leased_count: availability.leased_count,
        redis_available: state.breaker.is_healthy(),
    }))
}
