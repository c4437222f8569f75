//! WebSocket transport for the gateway
//!
//! GET /ws upgrades to a socket speaking the frames in [`super::events`].

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ClientEvent, Gateway};
use crate::config::AppState;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Drive one connection until either side goes away
pub async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut session, mut outbox) = gateway.connect();
    let connection_id = session.id();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("[Gateway] Failed to encode event: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => session.handle(event).await,
                    Err(e) => {
                        debug!(
                            "[Gateway] Connection {} sent an invalid frame: {}",
                            session.id(),
                            e
                        );
                        session.reject(format!("Invalid event: {}", e)).await;
                    }
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        // Dropping the session here leaves every group.
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    debug!("[Gateway] Connection {} finished", connection_id);
}
