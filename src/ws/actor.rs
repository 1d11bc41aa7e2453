use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::{protocol, ConnectionEntry};

/// Server sends a WebSocket ping on this interval to detect abrupt
/// disconnects; connections that miss the pong window are torn down, which
/// is what keeps phantom members out of rooms.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If a pong is not received within this window after a ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an upgraded WebSocket.
///
/// Splits the socket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader loop: decodes inbound events and dispatches them
///
/// Any part of the system can push messages to this client by cloning the
/// channel sender out of the connection registry.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    state.connections.insert(
        conn_id,
        ConnectionEntry {
            tx: tx.clone(),
            user_name: None,
            room_code: None,
        },
    );

    tracing::info!(conn = %conn_id, "websocket actor started");

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception for the ping task.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick.
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died; connection is gone.
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), conn_id, &state).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(conn = %conn_id, "ignoring binary frame (protocol is JSON text)");
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(conn = %conn_id, reason = ?frame, "client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(conn = %conn_id, error = %e, "websocket receive error");
                break;
            }
            None => {
                tracing::info!(conn = %conn_id, "websocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    // Implicit leave: the reader loop ending is the one disconnect signal,
    // whatever the cause. leave_current_room is idempotent.
    protocol::leave_current_room(&state, conn_id);
    state.connections.remove(&conn_id);

    tracing::info!(conn = %conn_id, "websocket actor stopped");
}

/// Writer task: forwards mpsc messages to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed; connection is broken.
            break;
        }
    }
}
