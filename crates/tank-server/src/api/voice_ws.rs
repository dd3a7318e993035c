//! Realtime voice websocket endpoint at `/ws/{session_id}`.
//!
//! One duplex connection per session: binary frames carry PCM, JSON text
//! frames carry control traffic. A single writer task serializes everything
//! the session produces so frame order is preserved end to end.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::protocol::{ClientFrame, OutboundFrame};
use crate::session::Session;
use crate::state::AppState;

const OUTBOUND_QUEUE_FRAMES: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/{session_id}", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    info!(%session_id, "websocket connected");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_FRAMES);

    // Single consumer for all outbound frames: producers (pipeline, brain,
    // TTS) enqueue, this task alone writes to the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                OutboundFrame::Text(frame) => match serde_json::to_string(&frame) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!("failed to serialize outbound frame: {e}");
                        continue;
                    }
                },
                OutboundFrame::Binary(bytes) => Message::Binary(bytes.into()),
                OutboundFrame::Pong(payload) => Message::Pong(payload.into()),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let session = Session::spawn(state.session_deps(), session_id.clone(), out_tx.clone()).await;

    while let Some(received) = ws_rx.next().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                warn!(%session_id, "websocket receive error: {e}");
                break;
            }
        };
        match message {
            Message::Binary(data) => session.push_audio(&data).await,
            Message::Text(text) => handle_control_frame(&session, text.as_str()).await,
            Message::Ping(payload) => {
                let _ = out_tx.send(OutboundFrame::Pong(payload.to_vec())).await;
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }

    session.close().await;
    // every outbound sender must drop before the writer can finish
    drop(session);
    drop(out_tx);
    let _ = writer.await;
    info!(%session_id, "websocket disconnected");
}

/// Route one JSON control frame. Malformed or unknown frames are logged and
/// dropped; they never close the connection.
pub async fn handle_control_frame(session: &Session, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Input { content }) => {
            debug!(session_id = %session.session_id(), "text input frame");
            session.submit_text(&content).await;
        }
        Ok(ClientFrame::Interrupt) => session.interrupt("client interrupt"),
        Ok(ClientFrame::Unknown) => {
            warn!(session_id = %session.session_id(), "unknown control frame type, dropping");
        }
        Err(e) => {
            warn!(session_id = %session.session_id(), "malformed control frame, dropping: {e}");
        }
    }
}
