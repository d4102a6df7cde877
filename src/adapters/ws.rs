//! WebSocket viewer sessions
//!
//! Upgrades viewer connections and pumps pre-serialized notifications from
//! the broadcaster to each socket. The server pings on a fixed interval and
//! drops sessions that stop answering; a session failure never affects the
//! other sessions.

use crate::adapters::api_handler::ApiState;
use crate::adapters::broadcast::{Broadcaster, SessionId};
use crate::config::BroadcastSettings;
use crate::domain::ChangeNotification;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upgrade handler for `GET /api/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    let broadcaster = state.broadcaster.clone();
    let settings = state.settings.broadcast.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster, settings))
}

async fn handle_socket(
    socket: WebSocket,
    broadcaster: Arc<Broadcaster>,
    settings: BroadcastSettings,
) {
    let (session_id, mut rx) = broadcaster.register().await;
    info!(session_id = session_id, "Viewer session connected");

    let (mut sender, mut receiver) = socket.split();

    let keepalive = Duration::from_secs(settings.keepalive_interval_secs);
    let timeout = Duration::from_secs(settings.keepalive_timeout_secs);
    let mut ping_timer = tokio::time::interval(keepalive);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so the first ping waits a full
    // interval
    ping_timer.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            queued = rx.recv() => {
                match queued {
                    Some(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(session_id = session_id, error = %e, "Send failed, closing session");
                            break;
                        }
                    }
                    // Broadcaster dropped this session (send failure seen
                    // from another task)
                    None => break,
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session_id = session_id, "Viewer closed connection");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is sent automatically by the protocol layer
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        handle_client_message(&broadcaster, session_id, &text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_seen = Instant::now();
                        reply_error(
                            &broadcaster,
                            session_id,
                            "Binary messages are not supported",
                        )
                        .await;
                    }
                    Some(Err(e)) => {
                        warn!(session_id = session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }

            _ = ping_timer.tick() => {
                if last_seen.elapsed() > timeout {
                    info!(session_id = session_id, "Viewer session timed out");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    broadcaster.unregister(session_id).await;
    info!(session_id = session_id, "Viewer session disconnected");
}

/// Viewer-to-server messages must be JSON objects. Anything else earns a
/// targeted error notification rather than a disconnect.
async fn handle_client_message(broadcaster: &Broadcaster, session_id: SessionId, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.is_object() => {
            debug!(session_id = session_id, "Viewer message acknowledged");
        }
        _ => {
            warn!(session_id = session_id, "Malformed viewer message");
            reply_error(broadcaster, session_id, "Malformed message").await;
        }
    }
}

async fn reply_error(broadcaster: &Broadcaster, session_id: SessionId, message: &str) {
    broadcaster
        .send_to(
            session_id,
            ChangeNotification::Error {
                message: message.to_string(),
                code: Some("INVALID_MESSAGE".to_string()),
            },
        )
        .await;
}
