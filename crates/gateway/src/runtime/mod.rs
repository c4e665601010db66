//! Orchestration runtime: the agent loop, the planner, per-session control
//! tokens, and the thin entry point that binds a user turn to its session
//! and event channel.

pub mod agent_loop;
pub mod cancel;
pub mod planner;
pub mod verify;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use cf_domain::event::{EventPayload, InboundMessage};

use crate::state::AppState;
use agent_loop::AgentLoop;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Active turn tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Join handles of in-flight turns, one per session. A new user message
/// takes the old handle out, cancels it, and waits for the loop to wind
/// down before starting fresh.
#[derive(Default)]
pub struct TurnMap {
    handles: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TurnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn take(&self, session_id: &str) -> Option<JoinHandle<()>> {
        self.handles.lock().await.remove(session_id)
    }

    pub async fn insert(&self, session_id: &str, handle: JoinHandle<()>) {
        if let Some(stale) = self
            .handles
            .lock()
            .await
            .insert(session_id.to_string(), handle)
        {
            // A finished predecessor that was never reaped.
            if !stale.is_finished() {
                tracing::warn!(session_id, "replacing a still-running turn handle");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one user turn to completion: bind or create the session, merge any
/// frontend snapshot, cancel a still-active previous turn, and drive an
/// agent loop on the session's event channel.
pub async fn run_user_turn(
    state: &AppState,
    session_id: &str,
    content: &str,
    frontend_state: Option<Value>,
) {
    state.sessions.resolve_or_create(session_id);
    if let Some(snapshot) = frontend_state {
        state.sessions.sync_frontend_state(session_id, snapshot);
    }

    // An inbound message during an active loop aborts it after the current
    // tool returns; we wait for the drain before starting the new turn.
    if let Some(previous) = state.turns.take(session_id).await {
        state.control.cancel(session_id);
        let _ = previous.await;
    }

    let control = state.control.register(session_id);
    let channel = state.bus.channel(session_id);
    let mut agent = AgentLoop::new(
        session_id.to_string(),
        channel,
        state.planner.clone(),
        state.executor.clone(),
        state.sessions.clone(),
        state.retrieval.clone(),
        control,
        state.config.agent.max_iterations,
        state.config.agent.streaming_mode,
        Duration::from_secs(state.config.tools.timeout_secs),
    );
    agent.run(content).await;
    state.control.remove(session_id);
}

/// Spawn a turn in the background, tracking its handle for cancellation.
pub async fn spawn_user_turn(
    state: AppState,
    session_id: String,
    content: String,
    frontend_state: Option<Value>,
) {
    let task_state = state.clone();
    let task_session = session_id.clone();
    let handle = tokio::spawn(async move {
        run_user_turn(&task_state, &task_session, &content, frontend_state).await;
    });
    state.turns.insert(&session_id, handle).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle one parsed inbound message from a connection.
pub async fn handle_inbound(
    state: &AppState,
    session_id: &str,
    connection_id: u64,
    message: InboundMessage,
) {
    let channel = state.bus.channel(session_id);
    match message {
        InboundMessage::UserMessage {
            content,
            frontend_state,
        } => {
            spawn_user_turn(
                state.clone(),
                session_id.to_string(),
                content,
                frontend_state,
            )
            .await;
        }

        InboundMessage::Ping => {
            channel.emit_to(connection_id, EventPayload::Pong);
        }

        InboundMessage::Heartbeat => {
            channel.emit_to(connection_id, EventPayload::HeartbeatAck);
        }

        InboundMessage::Suggestion {
            suggestion_type,
            action,
        } => {
            // Auto-execute a previously offered action as a normal turn.
            tracing::info!(session_id, suggestion_type, "auto-executing suggestion");
            spawn_user_turn(state.clone(), session_id.to_string(), action, None).await;
        }

        InboundMessage::ContextUpdate { context_type, data } => {
            match (context_type.as_str(), data) {
                ("preferences", Value::Object(patch)) => {
                    state.sessions.merge_preferences(session_id, patch);
                }
                ("frontend_state", snapshot) => {
                    state.sessions.sync_frontend_state(session_id, snapshot);
                }
                (_, Value::Object(patch)) => {
                    state.sessions.update_session_context(session_id, patch);
                }
                (other, _) => {
                    channel.emit_to(
                        connection_id,
                        EventPayload::Error {
                            message: format!(
                                "context_update for '{other}' must carry an object"
                            ),
                        },
                    );
                }
            }
        }
    }
}
