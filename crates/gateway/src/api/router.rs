//! The axum router. The surface is deliberately small: health, tool
//! discovery, and the per-session WebSocket attach.

use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::stream::ws;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/healthz", get(health))
        .route("/v1/tools", get(list_tools))
        .route("/v1/sessions/:session_id/ws", get(ws::session_ws))
        .route("/v1/sessions/:session_id", delete(teardown_session))
        .route("/v1/sessions/:session_id/pause", post(pause_session))
        .route("/v1/sessions/:session_id/resume", post(resume_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // Development default.
        CorsLayer::new().allow_origin(Any).allow_methods(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.sessions.len(),
        "tools": state.registry.len(),
        "llm": if state.llm.has_transport() { "configured" } else { "fallback" },
        "retrieval": state.retrieval.stats().backend,
    }))
}

#[derive(Debug, Deserialize)]
struct DiscoverQuery {
    query: Option<String>,
}

/// GET /v1/tools?query= — registry discovery. With a query, prior
/// successful executions recorded in the retrieval index rank matching
/// tools first.
async fn list_tools(
    State(state): State<AppState>,
    Query(params): Query<DiscoverQuery>,
) -> Json<Value> {
    let query = params.query.unwrap_or_default();

    let boost = if query.is_empty() {
        Vec::new()
    } else {
        let cfg = &state.config.retrieval;
        match state.retrieval.search(&query, cfg.top_k, cfg.threshold).await {
            Ok(hits) => hits
                .iter()
                .filter(|h| h.document.kind() == Some("tool_result"))
                .filter(|h| h.document.metadata.get("success") == Some(&Value::Bool(true)))
                .filter_map(|h| {
                    h.document
                        .metadata
                        .get("tool")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    };

    let tools = state.registry.discover(&query, &boost);
    let count = tools.len();
    Json(json!({ "tools": tools, "count": count }))
}

/// DELETE /v1/sessions/{id} — explicit teardown: cancels any active turn,
/// waits for its loop to wind down, then drops the session's state,
/// channel, and retrieval documents. The wait matters: a loop still
/// running after teardown would recreate the session on its next write.
async fn teardown_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    if let Some(active) = state.turns.take(&session_id).await {
        state.control.cancel(&session_id);
        let _ = active.await;
    }
    let existed = state.sessions.remove(&session_id);
    state.bus.remove(&session_id);
    let documents_removed = state.retrieval.clear_session(&session_id);
    Json(json!({ "removed": existed, "documents_removed": documents_removed }))
}

/// POST /v1/sessions/{id}/pause — park the active loop at its cursor.
async fn pause_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    Json(json!({ "paused": state.control.pause(&session_id) }))
}

/// POST /v1/sessions/{id}/resume — re-enter execution at the same cursor.
async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    Json(json!({ "resumed": state.control.resume(&session_id) }))
}
