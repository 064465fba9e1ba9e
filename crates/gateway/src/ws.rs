//! WebSocket endpoint — `GET /ws?user_id=…&token=…`.
//!
//! Server → client frames are [`prism_notify::NotifyFrame`]s serialized as
//! `{type, data, timestamp}`. Client → server frames are `{action, data}`;
//! `ping` is answered at the protocol level, anything else is ignored.
//!
//! Token validation belongs to the fronting auth proxy; the parameter is
//! accepted here so clients keep one URL shape.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{info, warn};

use prism_core::Error;

use crate::api::ApiError;
use crate::SharedState;

#[derive(Deserialize)]
pub struct WsQuery {
    pub user_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> Response {
    if query.user_id.trim().is_empty() {
        return ApiError(Error::Unauthorized("user_id is required".into())).into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state, query.user_id))
}

async fn handle_connection(mut socket: WebSocket, state: SharedState, user_id: String) {
    let (client_id, mut rx) = state.hub.subscribe(&user_id).await;
    info!(participant = %user_id, "websocket connected");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        let json = serde_json::to_string(&frame).unwrap_or_default();
                        if socket.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped us (queue overflow) — the client must
                    // reconnect.
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_client_frame(&mut socket, &text).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary, ping, pong
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.hub.disconnect(&user_id, &client_id).await;
    info!(participant = %user_id, "websocket closed");
}

#[derive(Deserialize)]
struct ClientFrame {
    action: String,
}

async fn handle_client_frame(socket: &mut WebSocket, raw: &str) {
    match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) if frame.action == "ping" => {
            let _ = socket.send(WsMessage::Pong(Vec::new().into())).await;
        }
        Ok(frame) => {
            warn!(action = %frame.action, "ignoring unknown client action");
        }
        Err(e) => {
            warn!(error = %e, "malformed client frame");
        }
    }
}
