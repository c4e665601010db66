//! WebSocket endpoint for session channels.
//!
//! Flow:
//! 1. Client connects to `/v1/sessions/{id}/ws?last_message_id=<id>`
//! 2. Gateway attaches the connection to the session's event channel;
//!    `connection_established` is delivered first, then any replay
//! 3. Full-duplex exchange: the gateway streams events, the client sends
//!    `user_message` / `ping` / `heartbeat` / `suggestion` /
//!    `context_update`
//!
//! Malformed inbound messages are answered with an `error` event on this
//! connection; the connection stays open.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use cf_domain::event::{EventPayload, InboundMessage};

use crate::runtime;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AttachQuery {
    /// Last event id this client saw; buffered events after it are
    /// replayed on attach.
    pub last_message_id: Option<String>,
    /// Optional caller identity, carried for logs only.
    pub user_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/sessions/{id}/ws — upgrade to WebSocket and attach.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<AttachQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, query))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    session_id: String,
    query: AttachQuery,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    state.sessions.resolve_or_create(&session_id);
    let channel = state.bus.channel(&session_id);
    let (connection_id, mut events) = channel.attach(query.last_message_id.as_deref());

    tracing::info!(
        session_id = %session_id,
        connection_id,
        user_id = query.user_id.as_deref().unwrap_or("-"),
        resumed_from = query.last_message_id.as_deref().unwrap_or("-"),
        "session connection attached"
    );

    // Writer task: forward channel events to the socket. A send failure
    // detaches this connection only.
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize event");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: parse and dispatch inbound messages.
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => {
                    runtime::handle_inbound(&state, &session_id, connection_id, inbound).await;
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = %session_id,
                        error = %e,
                        "malformed inbound message"
                    );
                    channel.emit_to(
                        connection_id,
                        EventPayload::Error {
                            message: format!("could not parse message: {e}"),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            // axum answers WS-level pings automatically.
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
    }

    channel.detach(connection_id);
    writer.abort();
    tracing::info!(
        session_id = %session_id,
        connection_id,
        "session connection detached"
    );
}
