//! WebSocket connection handler
//!
//! Carries the whole control surface (create, reconfigure, terminate, list)
//! and streams every session event to the client as a `log` message.

use super::super::error::{AppError, Result};
use super::super::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use vigil_events::{SessionEvent, SessionKey};
use vigil_reconciler::{CreateSession, Credentials, ReconfigureSession, SessionSummary, TargetId};

/// WebSocket message types sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start supervising a target
    Create {
        credentials: Credentials,
        target_id: TargetId,
        #[serde(default)]
        desired_name: Option<String>,
        #[serde(default)]
        desired_label: Option<String>,
        #[serde(default)]
        cadence_secs: Option<u64>,
    },
    /// Change an existing session
    Reconfigure {
        session_key: SessionKey,
        target_id: TargetId,
        #[serde(default)]
        desired_name: Option<String>,
        #[serde(default)]
        desired_label: Option<String>,
        #[serde(default)]
        cadence_secs: Option<u64>,
        #[serde(default)]
        credentials: Option<Credentials>,
    },
    /// Stop and remove a session
    Terminate { session_key: SessionKey },
    /// Request the session list
    List,
    /// Ping to keep connection alive
    Ping,
}

/// WebSocket message types sent from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A session was created
    Created { session_key: SessionKey },
    /// Current session list
    Sessions { sessions: Vec<SessionSummary> },
    /// A reconfigure or terminate request was applied
    Ack {
        session_key: SessionKey,
        action: String,
    },
    /// Session event forwarded from the broadcaster
    Log {
        #[serde(flatten)]
        event: SessionEvent,
    },
    /// Pong response to ping
    Pong,
    /// Error message
    Error { message: String },
}

/// GET /ws - WebSocket upgrade endpoint
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection lifecycle
///
/// connect -> (client messages | session events) -> disconnect
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.events().subscribe().await;
    let observer = subscription.id();
    info!(observer = %observer, "WebSocket connection established");

    loop {
        tokio::select! {
            msg_result = receiver.next() => {
                let Some(msg) = msg_result else {
                    debug!("Client disconnected");
                    break;
                };
                let reply = match process_message(msg, &state).await {
                    Ok(Flow::Reply(reply)) => reply,
                    Ok(Flow::Ignore) => continue,
                    Ok(Flow::Close) => {
                        debug!("Connection closing gracefully");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Error processing message");
                        ServerMessage::Error { message: e.to_string() }
                    }
                };
                if let Err(e) = send_message(&mut sender, reply).await {
                    error!("Failed to send message: {}", e);
                    break;
                }
            }
            event = subscription.recv() => {
                match event {
                    Ok(event) => {
                        if let Err(e) = send_message(&mut sender, ServerMessage::Log { event }).await {
                            error!("Failed to send log message: {}", e);
                            break;
                        }
                    }
                    Err(_) => {
                        warn!(observer = %observer, "Observer evicted, closing connection");
                        break;
                    }
                }
            }
        }
    }

    state.events().unsubscribe(observer).await;
    info!(observer = %observer, "WebSocket connection closed");
}

/// What to do after one inbound frame.
enum Flow {
    Reply(ServerMessage),
    Ignore,
    Close,
}

/// Process incoming WebSocket message
async fn process_message(
    msg_result: std::result::Result<Message, axum::Error>,
    state: &AppState,
) -> Result<Flow> {
    let msg = msg_result.map_err(|e| AppError::Internal(format!("WebSocket error: {e}")))?;

    match msg {
        Message::Text(text) => {
            let client_msg: ClientMessage = serde_json::from_str(text.as_str())
                .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {e}")))?;
            Ok(Flow::Reply(handle_client_message(client_msg, state).await))
        }
        Message::Binary(_) => Err(AppError::BadRequest(
            "Binary messages not supported".to_string(),
        )),
        // Protocol-level ping/pong frames are answered by axum itself.
        Message::Ping(_) | Message::Pong(_) => Ok(Flow::Ignore),
        Message::Close(_) => Ok(Flow::Close),
    }
}

/// Dispatch a parsed client message to the controller.
///
/// Controller failures become `error` replies; the connection stays open.
pub async fn handle_client_message(msg: ClientMessage, state: &AppState) -> ServerMessage {
    let controller = &state.controller;
    let result: Result<ServerMessage> = match msg {
        ClientMessage::Create {
            credentials,
            target_id,
            desired_name,
            desired_label,
            cadence_secs,
        } => controller
            .create_session(CreateSession {
                credentials,
                target_id,
                desired_name,
                desired_label,
                cadence_secs,
            })
            .await
            .map(|session_key| ServerMessage::Created { session_key })
            .map_err(AppError::from),
        ClientMessage::Reconfigure {
            session_key,
            target_id,
            desired_name,
            desired_label,
            cadence_secs,
            credentials,
        } => {
            let request = ReconfigureSession {
                target_id,
                desired_name,
                desired_label,
                cadence_secs,
                credentials,
            };
            match controller.reconfigure_session(&session_key, request).await {
                Ok(_) => Ok(ServerMessage::Ack {
                    session_key,
                    action: "reconfigure".to_string(),
                }),
                Err(e) => Err(AppError::from(e)),
            }
        }
        ClientMessage::Terminate { session_key } => {
            controller.terminate_session(&session_key).await;
            Ok(ServerMessage::Ack {
                session_key,
                action: "terminate".to_string(),
            })
        }
        ClientMessage::List => Ok(ServerMessage::Sessions {
            sessions: controller.list_sessions().await,
        }),
        ClientMessage::Ping => Ok(ServerMessage::Pong),
    };

    result.unwrap_or_else(|e| ServerMessage::Error {
        message: e.to_string(),
    })
}

/// Send message to WebSocket client
///
/// Serializes ServerMessage to JSON and sends as text
async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let json = serde_json::to_string(&msg)
        .map_err(|e| AppError::Internal(format!("Failed to serialize message: {e}")))?;

    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| AppError::Internal(format!("Failed to send message: {e}")))
}
