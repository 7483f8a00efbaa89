// =============================================================================
// WebSocket Handler — dashboard push feed
// =============================================================================
//
// Clients connect to `/ws?token=<token>` and receive:
//   1. An immediate `dashboard` frame plus a `ws-status-v1` frame on connect.
//   2. A fresh pair of both frames every time the engine loop pushes a new
//      `DashboardSnapshot` onto its watch channel (SPEC_FULL §6:
//      `config.dashboard_broadcast_hz`, 2Hz by default).
//
// Unlike the teacher's version-counter poll, this waits on
// `watch::Receiver::changed()` — no timer task, no missed-update window.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::api::ApiState;
use crate::dashboard::{self, DashboardSnapshot};
use crate::health::HealthReport;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request. Validates the token from
/// the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("dashboard WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state)).into_response()
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut dashboard_rx = state.dashboard_rx.clone();
    let mut health_rx = state.health_rx.clone();

    let initial_snapshot = dashboard_rx.borrow().clone();
    let initial_health = health_rx.borrow().clone();
    if send_frames(&mut sender, &initial_snapshot, &initial_health).await.is_err() {
        info!("dashboard WebSocket closed before first send completed");
        return;
    }

    loop {
        tokio::select! {
            changed = dashboard_rx.changed() => {
                if changed.is_err() {
                    debug!("dashboard channel closed — disconnecting");
                    break;
                }
                let snapshot = dashboard_rx.borrow().clone();
                let health = health_rx.borrow().clone();
                if send_frames(&mut sender, &snapshot, &health).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "dashboard WebSocket text message received (ignored)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("dashboard WebSocket closed by peer");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "dashboard WebSocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!("dashboard WebSocket connection closed");
}

async fn send_frames<S>(sender: &mut S, snapshot: &DashboardSnapshot, health: &HealthReport) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let dashboard_json = serde_json::to_string(snapshot).unwrap_or_default();
    sender.send(Message::Text(dashboard_json.into())).await?;

    let status = dashboard::ws_status(health);
    let status_json = serde_json::to_string(&status).unwrap_or_default();
    sender.send(Message::Text(status_json.into())).await?;

    Ok(())
}
