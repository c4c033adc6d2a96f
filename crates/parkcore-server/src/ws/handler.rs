// Websocket session loop: `connect`/`subscribe`/`book_spot`/`disconnect`.
// A tokio::select! over a heartbeat interval, the outbound mpsc channel,
// and the inbound socket frame.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use parkcore_common::protocol::{ClientEvent, ServerEvent};
use parkcore_common::{minutes_since_midnight, RoomKey, TimeWindow};
use parkcore_core::coordinator::payment::PaymentProvider;
use parkcore_core::coordinator::{BookingOutcome, BookingRequest};
use parkcore_core::lease::cache::CoordinationCache;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

use crate::reference_data::amount_for_window;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

pub fn router<C, P>(state: AppState<C, P>) -> Router
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade<C, P>(State(state): State<AppState<C, P>>, ws: WebSocketUpgrade) -> impl IntoResponse
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket<C, P>(state: AppState<C, P>, mut socket: WebSocket)
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    let connection_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.reset();
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if last_pong.elapsed() > HEARTBEAT_TIMEOUT {
                    warn!(%connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else { break };
                match message {
                    Ok(Message::Text(raw)) => {
                        match serde_json::from_str::<ClientEvent>(&raw) {
                            Ok(event) => {
                                if handle_client_event(&state, connection_id, &outbound_tx, event).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!(%err, %connection_id, "dropping unparseable websocket frame");
                                let _ = outbound_tx.send(ServerEvent::SubscriptionError {
                                    message: "invalid message".to_string(),
                                });
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        error!(%err, %connection_id, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    if let Some((reservation_id, payment_context)) = state.rooms.disconnect(connection_id).await {
        if !payment_context {
            if let Ok(Some(metadata)) = state.coordinator.lease_manager().metadata(reservation_id).await {
                state.coordinator.lease_manager().release(metadata.spot_id, metadata.date, reservation_id).await.ok();
            }
        }
    }
}

/// A send failure on the outbound channel means the socket is gone; the
/// caller breaks its select loop in that case.
async fn handle_client_event<C, P>(
    state: &AppState<C, P>,
    connection_id: Uuid,
    outbound_tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) -> Result<(), ()>
where
    C: CoordinationCache + 'static,
    P: PaymentProvider + 'static,
{
    match event {
        ClientEvent::Subscribe { parking_lot_id, booking_date, start_time, end_time } => {
            let window = match TimeWindow::from_hhmm(&start_time, &end_time) {
                Ok(window) if window.start_minutes < window.end_minutes => window,
                _ => {
                    return send(outbound_tx, ServerEvent::SubscriptionError {
                        message: "invalid subscription window".to_string(),
                    });
                }
            };
            let room = RoomKey::new(parking_lot_id, booking_date);
            state
                .rooms
                .subscribe(
                    connection_id,
                    outbound_tx.clone(),
                    Some(connection_user_id(connection_id)),
                    room,
                    window.start_minutes,
                    window.end_minutes,
                )
                .await;
            Ok(())
        }
        ClientEvent::BookSpot { spot_id, parking_lot_id, booking_date, start_hour, start_minute, end_hour, end_minute } => {
            let start_minutes = minutes_since_midnight(start_hour, start_minute);
            let end_minutes = minutes_since_midnight(end_hour, end_minute);
            if start_minutes >= end_minutes {
                return send(outbound_tx, ServerEvent::BookingFailed { reason: "invalid window".to_string() });
            }

            let spot = match state.reference_data.spot(spot_id).await {
                Ok(Some(spot)) if spot.lot_id == parking_lot_id => spot,
                Ok(_) => {
                    return send(outbound_tx, ServerEvent::BookingFailed { reason: "unknown spot".to_string() });
                }
                Err(err) => {
                    error!(%err, %spot_id, "failed to look up spot for book_spot");
                    return send(outbound_tx, ServerEvent::BookingFailed { reason: "internal error".to_string() });
                }
            };

            let amount = amount_for_window(spot.price_per_hour, start_minutes, end_minutes);
            let existing_reservation_id = state.rooms.reservation_of(connection_id).await.map(|(id, _)| id);

            let request = BookingRequest {
                user_id: connection_user_id(connection_id),
                lot_id: parking_lot_id,
                spot_id,
                date: booking_date,
                start_minutes,
                end_minutes,
                amount,
                success_path: state.config.payment_success_path(),
                existing_reservation_id,
            };

            match state.coordinator.request_booking(request).await {
                Ok(BookingOutcome::Leased { reservation_id, redirect_url }) | Ok(BookingOutcome::Direct { reservation_id, redirect_url }) => {
                    state.rooms.set_reservation(connection_id, Some(reservation_id), true).await;
                    let room = RoomKey::new(parking_lot_id, booking_date);
                    state.rooms.emit_spot_update(room, spot_id, false, Some((start_minutes, end_minutes))).await;
                    send(outbound_tx, ServerEvent::PaymentRedirect { url: redirect_url })
                }
                Ok(BookingOutcome::Failed { reason }) => send(outbound_tx, ServerEvent::BookingFailed { reason }),
                Err(err) => {
                    warn!(%err, %spot_id, "book_spot request failed");
                    send(outbound_tx, ServerEvent::BookingFailed { reason: err.to_string() })
                }
            }
        }
    }
}

/// This core has no first-class user/auth model; the connection id stands
/// in for the acting user within a single websocket session's lifetime.
fn connection_user_id(connection_id: Uuid) -> Uuid {
    connection_id
}

fn send(outbound_tx: &mpsc::UnboundedSender<ServerEvent>, event: ServerEvent) -> Result<(), ()> {
    outbound_tx.send(event).map_err(|_| ())
}
