//! WebSocket upgrade and socket pumps.
//!
//! The socket splits into a receive loop (this task) and a single sender
//! task fed by an mpsc channel. Everything that wants to talk to the client
//! clones the channel sender, which is what keeps event order stable across
//! the ingest pump, the orchestrator and the controller.

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::session::CloseReason;
use crate::state::AppState;

use super::controller::{Flow, SessionController};
use super::messages::{OutgoingMessage, WsOutbound};

/// Buffered outbound events per connection
const OUTGOING_BUFFER: usize = 256;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<WsOutbound>(OUTGOING_BUFFER);

    // Single writer to the socket; ends on a close directive or client loss.
    let send_task = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                WsOutbound::Event(msg) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            debug!("Dropping unserializable event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                WsOutbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
        let _ = sender.close().await;
    });

    let connection_id = uuid::Uuid::new_v4().to_string();
    let _ = out_tx
        .send(WsOutbound::Event(OutgoingMessage::Connected {
            session_id: connection_id.clone(),
        }))
        .await;

    let mut controller = SessionController::new(state, out_tx.clone(), connection_id);
    let mut close_reason = CloseReason::ClientDisconnect;

    while let Some(msg) = receiver.next().await {
        let flow = match msg {
            Ok(Message::Text(text)) => controller.handle_text(text.as_str()).await,
            Ok(Message::Binary(chunk)) => controller.handle_audio(chunk).await,
            Ok(Message::Close(_)) => Flow::Stop(CloseReason::ClientDisconnect),
            Ok(_) => Flow::Continue,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                Flow::Stop(CloseReason::ClientDisconnect)
            }
        };
        if let Flow::Stop(reason) = flow {
            close_reason = reason;
            break;
        }
    }

    controller.finish(close_reason).await;
    drop(out_tx);
    let _ = send_task.await;
}
