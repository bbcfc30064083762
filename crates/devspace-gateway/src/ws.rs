//! WebSocket event channel.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::GatewayError;
use crate::hub::SessionId;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::runner::Dispatch;

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut events) = state.hub.subscribe();

    // Prompt the client to fetch the tree straight away.
    state
        .hub
        .send_to(&session_id, ServerEvent::FileRefresh { changes: Vec::new() });

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            tokio::select! {
                envelope = events.recv() => {
                    let Some(envelope) = envelope else { break };
                    let json = match serde_json::to_string(&envelope) {
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
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    if let Err(e) = handle_message(&state, message).await {
                        warn!("Failed to handle message from session {}: {}", session_id, e);
                        reply_error(&state, &session_id, e.to_string());
                    }
                }
                Err(e) => {
                    warn!("Failed to parse message from session {}: {}", session_id, e);
                    reply_error(&state, &session_id, format!("Malformed message: {e}"));
                }
            },
            Ok(Message::Binary(_)) => {
                debug!("Received binary message from session {}, ignoring", session_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Session {} closed WebSocket connection", session_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error for session {}: {}", session_id, e);
                break;
            }
        }
    }

    send_task.abort();
    state.hub.unsubscribe(&session_id);
}

async fn handle_message(state: &AppState, message: ClientMessage) -> Result<(), GatewayError> {
    match message {
        ClientMessage::TerminalWrite(data) => {
            state.terminal.write(data.as_bytes());
        }
        ClientMessage::FileChange { path, content } => {
            state.workspace.write_file(&path, &content).await?;
        }
        ClientMessage::RunFile { path } => {
            if let Dispatch::Accepted { command } = state.runner.dispatch(&path).await? {
                state.hub.publish(ServerEvent::RunAccepted { path, command });
            }
        }
    }
    Ok(())
}

fn reply_error(state: &AppState, session_id: &SessionId, message: String) {
    state.hub.send_to(session_id, ServerEvent::Error { message });
}
