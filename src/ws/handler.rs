//! Per-connection WebSocket loop.
//!
//! Clients steer their subscriptions with JSON control frames
//! `{action: "subscribe"|"unsubscribe", module_id: "<topic>"}`; everything
//! else flows server→client. Ping/pong keepalive closes dead peers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::registry::WsRegistry;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ControlFrame {
    action: String,
    /// Topic to (un)subscribe; the field name is part of the wire contract.
    #[serde(default)]
    module_id: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<WsRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

/// Handler that accepts the registry directly (for use with the server
/// router, whose state is the full `AppState`).
pub async fn ws_handler_with(ws: WebSocketUpgrade, registry: Arc<WsRegistry>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<WsRegistry>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut frames) = mpsc::channel::<String>(64);
    let conn_id = registry.register(tx);

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            frame = frames.recv() => {
                match frame {
                    Some(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_control(&registry, conn_id, text.as_str());
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Binary, Ping: ignored
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Read error or close: drop every subscription this connection held.
    registry.unregister(conn_id);
    let _ = sender.send(Message::Close(None)).await;
}

fn handle_control(registry: &WsRegistry, conn_id: u64, text: &str) {
    let frame: ControlFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(conn = conn_id, "ignoring malformed control frame: {e}");
            return;
        }
    };
    match frame.action.as_str() {
        "subscribe" => registry.subscribe(conn_id, &frame.module_id),
        "unsubscribe" => registry.unsubscribe(conn_id, &frame.module_id),
        other => debug!(conn = conn_id, action = other, "unknown control action"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frame_wire_format() {
        let frame: ControlFrame =
            serde_json::from_str(r#"{"action":"subscribe","module_id":"module:m1"}"#).unwrap();
        assert_eq!(frame.action, "subscribe");
        assert_eq!(frame.module_id, "module:m1");
    }

    #[test]
    fn test_control_frame_defaults_empty_topic() {
        let frame: ControlFrame = serde_json::from_str(r#"{"action":"unsubscribe"}"#).unwrap();
        assert_eq!(frame.module_id, "");
    }
}
