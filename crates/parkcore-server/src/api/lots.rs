use axum::extract::State;
use axum::Json;
use parkcore_common::Lot;
use parkcore_core::coordinator::payment::PaymentProvider;
use parkcore_core::lease::cache::CoordinationCache;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CitySelectedRequest {
    pub city_id: Uuid,
}

pub async fn city_selected<C, P>(
    State(state): State<AppState<C, P>>,
    Json(request): Json<CitySelectedRequest>,
) -> Result<Json<Vec<Lot>>, ApiError>
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    let lots = state
        .reference_data
        .lots_for_city(request.city_id)
        .await
        .map_err(|err| ApiError::new(ErrorCode::InternalError, err.to_string()))?;
    Ok(Json(lots))
}
