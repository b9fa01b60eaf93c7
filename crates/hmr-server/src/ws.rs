//! Push endpoint: one WebSocket per client, fed by the broadcaster.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::broadcaster::NotificationBroadcaster;

/// GET /__hmr - upgrade to the notification socket.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let broadcaster = state.broadcaster.clone();
    let ping_interval = state.config.server.ping_interval();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, broadcaster, ping_interval))
}

async fn handle_ws_connection(
    socket: WebSocket,
    broadcaster: Arc<NotificationBroadcaster>,
    ping_interval: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let (client_id, mut events) = broadcaster.register_client();

    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ping.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Clients only listen; drain the socket to notice when it closes.
    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(Message::Close(_)) => {
                debug!("Client {} closed the socket", client_id);
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring message from client {}: {}", client_id, text.as_str());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for client {}: {}", client_id, e);
                break;
            }
        }
    }

    send_task.abort();
    broadcaster.unregister_client(client_id);
    info!("Client {} disconnected", client_id);
}
