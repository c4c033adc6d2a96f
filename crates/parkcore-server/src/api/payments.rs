use axum::extract::{Query, State};
use axum::http::{header::LOCATION, StatusCode};
use axum::response::{IntoResponse, Response};
use parkcore_common::ConfirmOutcome;
use parkcore_core::coordinator::payment::PaymentProvider;
use parkcore_core::lease::cache::CoordinationCache;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ApiError, ErrorCode};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentCallbackQuery {
    pub session_id: String,
}

/// Success callback for the leased path: recovers the reservation and
/// charged amount from the provider's own session record, then confirms.
/// Idempotent on `stripe_{sessionId}` so a retried callback is a no-op
/// past the first successful confirmation.
pub async fn payment_success<C, P>(
    State(state): State<AppState<C, P>>,
    Query(query): Query<PaymentCallbackQuery>,
) -> Result<Response, ApiError>
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    let session = state
        .coordinator
        .payment_provider()
        .retrieve_session(&query.session_id)
        .await
        .map_err(|err| ApiError::new(ErrorCode::PaymentUnavailable, err.to_string()))?;

    let idempotency_key = format!("stripe_{}", query.session_id);
    let outcome = state
        .coordinator
        .confirm_leased(
            session.metadata.reservation_id,
            session.metadata.user_id,
            session.metadata.spot_id,
            session.amount,
            &idempotency_key,
        )
        .await?;

    let room = parkcore_common::RoomKey::new(session.metadata.lot_id, session.metadata.booking_date);
    match &outcome {
        ConfirmOutcome::Success { .. } => {
            state.rooms.emit_spot_update(room, session.metadata.spot_id, false, None).await;
            state.rooms.notify_payment_complete(session.metadata.user_id).await;
        }
        ConfirmOutcome::Failed { reason } => {
            warn!(session_id = %query.session_id, %reason, "leased payment confirmation failed");
            state
                .rooms
                .emit_spot_update(
                    room,
                    session.metadata.spot_id,
                    true,
                    Some((session.metadata.start_minutes, session.metadata.end_minutes)),
                )
                .await;
        }
    }

    Ok(redirect_to(&state.config.public_base_url))
}

/// Success callback for the direct path. Same idempotency/confirmation
/// shape as `payment_success`, but the booking's identity is recovered
/// from `pending_bookings` by reservation id rather than from lease
/// metadata.
pub async fn payment_success_direct<C, P>(
    State(state): State<AppState<C, P>>,
    Query(query): Query<PaymentCallbackQuery>,
) -> Result<Response, ApiError>
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    let session = state
        .coordinator
        .payment_provider()
        .retrieve_session(&query.session_id)
        .await
        .map_err(|err| ApiError::new(ErrorCode::PaymentUnavailable, err.to_string()))?;

    let idempotency_key = format!("stripe_{}", query.session_id);
    let outcome = state.coordinator.confirm_direct(session.metadata.reservation_id, &idempotency_key).await?;

    let room = parkcore_common::RoomKey::new(session.metadata.lot_id, session.metadata.booking_date);
    match &outcome {
        ConfirmOutcome::Success { .. } => {
            state.rooms.emit_spot_update(room, session.metadata.spot_id, false, None).await;
            state.rooms.notify_payment_complete(session.metadata.user_id).await;
        }
        ConfirmOutcome::Failed { reason } => {
            warn!(session_id = %query.session_id, %reason, "direct payment confirmation failed");
        }
    }

    Ok(redirect_to(&state.config.public_base_url))
}

fn redirect_to(base_url: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, format!("{base_url}/dashboard"))]).into_response()
}
