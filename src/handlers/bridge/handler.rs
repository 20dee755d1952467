//! Session WebSocket handler.
//!
//! Upgrades the client connection, registers the session, spawns its event
//! loop and pumps socket I/O: a sender task drains the outbound route
//! channel, and the read loop feeds parsed input to the session loop while
//! watching for idle clients.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::session::runner::{SessionInput, run_session};
use crate::core::session::store::SessionHandle;
use crate::state::AppState;

use super::messages::{ClientMessage, MessageRoute, RelayMessage};

/// Optimized channel buffer size for audio workloads
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Session WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket for a live bridge session.
pub async fn session_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Session WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_session_socket(socket, state))
}

/// Handle the session WebSocket connection
async fn handle_session_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, "Session WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, MessageRoute::Close);

            let result = match route {
                MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                MessageRoute::Close => {
                    info!("Closing session WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    // Register the session and spawn its event loop
    let cancel = app_state
        .sessions
        .insert(SessionHandle::new(session_id.clone()));
    let (input_tx, input_rx) = mpsc::channel::<SessionInput>(CHANNEL_BUFFER_SIZE);
    let runner = tokio::spawn(run_session(
        session_id.clone(),
        app_state.clone(),
        input_rx,
        message_tx.clone(),
        cancel.clone(),
    ));

    let idle_timeout = app_state.config.idle_timeout();
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, "Session cancelled, closing socket");
                break;
            }
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_socket_message(msg, &input_tx, &message_tx).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Session WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "Session WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        session_id = %session_id,
                        "Session idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx
                        .send(MessageRoute::Outgoing(RelayMessage::Error {
                            code: Some("idle_timeout".to_string()),
                            message: "Connection closed due to inactivity".to_string(),
                        }))
                        .await;
                    break;
                }
                debug!(session_id = %session_id, "Idle check - session still active");
            }
        }
    }

    // Cleanup: destruction cancels the event loop, which closes the engine
    // link and every session-scoped timer. Idempotent if the runner already
    // destroyed itself.
    drop(input_tx);
    app_state.sessions.destroy(&session_id);
    let _ = runner.await;
    sender_task.abort();

    info!(session_id = %session_id, "Session WebSocket connection terminated");
}

/// Process one incoming socket message. Returns false to terminate the
/// connection.
async fn process_socket_message(
    msg: Message,
    input_tx: &mpsc::Sender<SessionInput>,
    message_tx: &mpsc::Sender<MessageRoute>,
) -> bool {
    match msg {
        Message::Text(text) => {
            let incoming: ClientMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    // Protocol error: log and drop the single message
                    warn!("Failed to parse client message: {}", e);
                    let _ = message_tx
                        .send(MessageRoute::Outgoing(RelayMessage::Error {
                            code: Some("parse_error".to_string()),
                            message: format!("Invalid message format: {e}"),
                        }))
                        .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!("Message validation failed: {}", e);
                let _ = message_tx
                    .send(MessageRoute::Outgoing(RelayMessage::Error {
                        code: Some("validation_error".to_string()),
                        message: e.to_string(),
                    }))
                    .await;
                return true;
            }

            input_tx.send(SessionInput::Message(incoming)).await.is_ok()
        }
        Message::Binary(data) => {
            debug!("Received binary audio: {} bytes", data.len());
            input_tx.send(SessionInput::Audio(data)).await.is_ok()
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Session WebSocket close received");
            false
        }
    }
}
