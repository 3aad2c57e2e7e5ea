//! WebSocket push channel for confirmed row changes.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};

use gridline_core::{BroadcastEvent, BroadcastSubscription, ServerMessage};

use crate::AppState;

/// Upgrade to a WebSocket that streams `row_update` / `resync` messages.
///
/// The subscription is taken before the 101 response is sent, so every
/// change committed after the client sees the handshake reaches the socket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let subscription = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, state, subscription))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    mut subscription: BroadcastSubscription,
) {
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(
        "Client connected to {} ({} subscribers)",
        state.broadcaster.process_id(),
        state.broadcaster.subscriber_count()
    );

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let message = match event {
                    Some(BroadcastEvent::RowChanged(row)) => ServerMessage::RowUpdate { row },
                    Some(BroadcastEvent::Lagged(missed)) => {
                        tracing::warn!("Client missed {} changes, requesting resync", missed);
                        ServerMessage::Resync
                    }
                    None => break,
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode push message: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The channel is push-only; client frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!("Client disconnected from {}", state.broadcaster.process_id());
}
