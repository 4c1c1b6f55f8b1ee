//! WebSocket connection: one client in one room
//!
//! Outbound: every event emitted to the room, as a JSON text frame.
//! Inbound: control messages, rate limited per room and handed to the studio.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::events::{ControlMessage, ProgressEvent};
use super::server::AppState;
use crate::metrics::RATE_LIMITED;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, room, state))
}

fn frame(event: &ProgressEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(text) => Some(WsMessage::Text(text)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, room: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub.join_room(&room);
    let limiter = state.limiters.for_room(&room);
    state.studio.room_joined(&room);
    let sink = state.hub.sink(&room);
    info!(room = %room, "Client connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if let Some(msg) = frame(&event) {
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }
            inbound = receiver.next() => {
                let text = match inbound {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(room = %room, error = %e, "Socket error");
                        break;
                    }
                };

                // Rejections go to this client only
                let rejection = if !limiter.try_acquire() {
                    RATE_LIMITED.inc();
                    Some(ProgressEvent::error(format!(
                        "Too many requests; retry in {:?}",
                        limiter.retry_after()
                    )))
                } else {
                    match ControlMessage::parse(&text) {
                        Ok(message) => {
                            debug!(room = %room, event = message.name(), "Control message");
                            // Builds run detached; the handle is not awaited here
                            let _ = state.studio.handle(&room, message, sink.clone()).await;
                            None
                        }
                        Err(e) => Some(ProgressEvent::error(e.to_string())),
                    }
                };
                if let Some(msg) = rejection.as_ref().and_then(frame) {
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.hub.leave_room(subscription);
    if state.hub.subscribers(&room) == 0 {
        state.studio.forget_room(&room);
    }
    info!(room = %room, "Client disconnected");
}
