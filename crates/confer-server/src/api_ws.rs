//! WebSocket transport for direct messages and relationship events.
//!
//! A connection is authenticated during the handshake and registered only
//! after the credential verifies; a refused handshake leaves no trace in the
//! registry. Each open socket is one [`ConnectionHandle`], so a user with
//! two devices holds two handles and receives every frame on both.

use crate::error::ApiError;
use crate::frames::{IncomingFrame, OutgoingFrame};
use crate::middleware::bearer_token;
use crate::registry::ConnectionHandle;
use crate::session::AuthError;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;

/// Query parameters for the WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsConnectParams {
    /// Session credential, for clients that cannot set headers on the upgrade.
    pub token: Option<String>,
}

/// Picks the credential from the bearer header, falling back to `?token=`.
///
/// A header that is absent or not a bearer credential (browsers may attach
/// `Basic` auth on their own) yields to a non-blank query token.
fn resolve_credential(headers: &HeaderMap, params: &WsConnectParams) -> Result<String, AuthError> {
    match bearer_token(headers) {
        Ok(token) => Ok(token.to_string()),
        Err(e @ (AuthError::Missing | AuthError::Malformed)) => params
            .token
            .as_ref()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .ok_or(e),
        Err(e) => Err(e),
    }
}

/// WebSocket handler: `GET /ws`.
///
/// All auth attempts (success and failure) are logged with the remote address.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<WsConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match resolve_credential(&headers, &params)
        .and_then(|credential| state.verifier.verify(&credential))
    {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(remote_addr = %addr, "websocket auth failed: {}", e);
            return ApiError::from(e).into_response();
        }
    };

    tracing::info!(user_id = %user_id, remote_addr = %addr, "websocket auth success");
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

fn push_frame(handle: &ConnectionHandle, frame: OutgoingFrame) {
    if let Some(json) = frame.to_json() {
        handle.push(json);
    }
}

/// Handles an authenticated WebSocket connection until it closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded: a client too slow to drain its queue loses frames, not memory.
    let (tx, mut rx) = mpsc::channel::<String>(state.messaging.outbound_buffer.max(1));
    let handle = ConnectionHandle::new(tx);
    let connection_id = handle.id();
    state.registry.register(&user_id, handle.clone());
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "websocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => match serde_json::from_str::<IncomingFrame>(text.as_str()) {
                Ok(IncomingFrame::Send {
                    recipient_id,
                    content,
                }) => {
                    if let Err(e) = state
                        .router
                        .send(&user_id, connection_id, &recipient_id, content)
                        .await
                    {
                        tracing::debug!(
                            user_id = %user_id,
                            recipient_id = %recipient_id,
                            kind = e.kind(),
                            "send refused: {}",
                            e
                        );
                        push_frame(
                            &handle,
                            OutgoingFrame::SendError {
                                kind: e.kind().to_string(),
                                reason: e.to_string(),
                            },
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, "failed to parse incoming frame: {}", e);
                    push_frame(
                        &handle,
                        OutgoingFrame::Error {
                            message: "invalid frame format".to_string(),
                        },
                    );
                }
            },
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(&user_id, connection_id);
    send_task.abort();
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "websocket disconnected");
}
