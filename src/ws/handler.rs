//! axum WebSocket upgrade handler: authenticate, register the session,
//! forward outbound envelopes, and service the inbound ping/pong protocol.

use crate::auth::AuthPredicate;
use crate::transcript::Envelope;
use crate::ws::registry::ConnectionRegistry;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Clone)]
pub struct WsState {
    pub registry: ConnectionRegistry,
    pub auth: Arc<dyn AuthPredicate>,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<WsState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

const CLOSE_AUTH_REQUIRED: u16 = 1008;
const CLOSE_AUTH_FAILED: u16 = 1008;
const CLOSE_AUTH_SERVICE_ERROR: u16 = 1011;

async fn handle_socket(socket: WebSocket, query: WsQuery, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let user = match state.auth.validate(query.token.as_deref()).await {
        Ok(user) => user,
        Err(crate::auth::AuthError::MissingToken) => {
            close_with(&mut sender, CLOSE_AUTH_REQUIRED, "Authentication required").await;
            return;
        }
        Err(crate::auth::AuthError::InvalidToken) => {
            close_with(&mut sender, CLOSE_AUTH_FAILED, "Authentication failed").await;
            return;
        }
        Err(crate::auth::AuthError::ServiceError(_)) => {
            close_with(&mut sender, CLOSE_AUTH_SERVICE_ERROR, "Authentication service error").await;
            return;
        }
    };

    let (client_id, mut outbound_rx) = state.registry.accept(Some(user.user_id.clone()));
    let session = state.registry.session(client_id).unwrap();
    info!(%client_id, user_id = %user.user_id, "websocket connection established");

    let established = Envelope::new(
        "connection_established",
        serde_json::json!({
            "client_id": client_id,
            "subscriptions": session.subscriptions,
            "server_time": chrono::Utc::now(),
            "user_id": user.user_id,
        }),
    );
    if send_envelope(&mut sender, &established).await.is_err() {
        state.registry.remove(client_id);
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        if send_envelope(&mut sender, &envelope).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some((kind, data)) = handle_text_message(&text) {
                            if send_envelope(&mut sender, &Envelope::new(kind, data)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, %client_id, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    state.registry.remove(client_id);
    info!(%client_id, "websocket connection closed");
}

/// Handles one inbound text frame, returning the `(type, data)` pair to send
/// back synchronously, if any. Malformed JSON is silently ignored.
fn handle_text_message(text: &str) -> Option<(&'static str, serde_json::Value)> {
    let parsed: serde_json::Value = serde_json::from_str(text).ok()?;
    match parsed.get("type").and_then(|t| t.as_str()) {
        Some("ping") => Some(("pong", serde_json::json!({}))),
        Some(_) => Some(("error", serde_json::json!({"error": "unsupported message type"}))),
        None => None,
    }
}

async fn send_envelope(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(envelope).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}

async fn close_with(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &'static str,
) {
    warn!(code, reason, "closing websocket handshake");
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
