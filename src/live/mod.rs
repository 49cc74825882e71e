//! Live channel.
//!
//! One WebSocket per client. The handler:
//!   1. Resolves the session token (same auth as the HTTP API)
//!   2. Performs the HTTP→WebSocket upgrade
//!   3. Registers an outbound queue in the presence registry
//!   4. Drains queued pushes to the socket until either side closes
//!   5. Unregisters on close
//!
//! Route: GET /ws

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::metrics::metrics;
use crate::models::workspace::UserSummary;
use crate::presence::ConnectionHandle;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    /// Browsers cannot set headers on a WebSocket handshake, so the
    /// session token is also accepted as a query parameter.
    pub token: Option<String>,
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LiveQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&headers)
        .or(params.token)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user = state
        .db
        .session_user(&token)
        .await
        .map_err(|e| {
            tracing::error!("live: session lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .or_else(|| headers.get("Authorization"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

async fn handle_socket(socket: WebSocket, user: UserSummary, state: Arc<AppState>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = ConnectionHandle::new(tx);
    let conn_id = conn.id();

    state.presence.register(user.id, conn);
    metrics().live_connections.inc();
    tracing::info!(user_id = %user.id, conn_id = %conn_id, "live: connection registered");

    let (mut sink, mut stream) = socket.split();
    let mut outbound = UnboundedReceiverStream::new(rx);

    // Drain queued pushes to the socket.
    let push_loop = async {
        while let Some(msg) = outbound.next().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "live: payload serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    };

    // Client frames carry no commands; only the close matters.
    let read_loop = async {
        while let Some(Ok(frame)) = stream.next().await {
            if let Message::Close(_) = frame {
                break;
            }
        }
    };

    // Stop when either direction ends.
    tokio::select! {
        _ = push_loop => {},
        _ = read_loop => {},
    }

    state.presence.unregister(conn_id);
    metrics().live_connections.dec();
    tracing::info!(user_id = %user.id, conn_id = %conn_id, "live: connection closed");
}
