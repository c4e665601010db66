//! End-to-end turns through the orchestrator entry, with the event channel
//! attached in-process and the LLM client running on the rule-based
//! fallback (no credentials configured).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use cf_domain::config::{Config, StreamingMode};
use cf_domain::error::Error;
use cf_domain::event::{Event, EventPayload};
use cf_domain::tool::{ParamSpec, ParamType, ToolSchema};
use cf_gateway::runtime::run_user_turn;
use cf_gateway::state::AppState;
use cf_sessions::Role;
use cf_tools::Tool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_state(projects_root: &std::path::Path) -> AppState {
    let mut config = Config::default();
    config.projects.root = projects_root.to_path_buf();
    config.agent.streaming_mode = StreamingMode::Off;
    AppState::with_transport(Arc::new(config), None).unwrap()
}

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn tool_calls(events: &[Event]) -> Vec<(String, Value)> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolCall { tool, args, .. } => Some((tool.clone(), args.clone())),
            _ => None,
        })
        .collect()
}

fn tool_results(events: &[Event]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolResult { tool, success, .. } => Some((tool.clone(), *success)),
            _ => None,
        })
        .collect()
}

fn gui_updates(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::GuiUpdate { update } => Some(
                serde_json::to_value(update).unwrap()["update_type"]
                    .as_str()
                    .unwrap()
                    .to_string(),
            ),
            _ => None,
        })
        .collect()
}

fn position(events: &[Event], pred: impl Fn(&EventPayload) -> bool) -> usize {
    events
        .iter()
        .position(|e| pred(&e.payload))
        .expect("expected event not found")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: greeting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn greeting_is_conversational() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let (_, mut rx) = state.bus.channel("s1").attach(None);

    run_user_turn(&state, "s1", "hi", None).await;

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e.payload, EventPayload::Thinking { .. })));
    assert!(tool_calls(&events).is_empty());

    let greeting = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::AiMessage { content, .. } => Some(content.clone()),
            _ => None,
        })
        .expect("assistant reply missing");
    assert!(greeting.starts_with("Hello"));

    let snap = state.sessions.snapshot("s1").unwrap();
    assert_eq!(snap.conversation.len(), 2);
    assert_eq!(snap.conversation[0].role, Role::User);
    assert_eq!(snap.conversation[1].role, Role::Assistant);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: script only
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn script_request_runs_one_step_workflow() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let (_, mut rx) = state.bus.channel("s1").attach(None);

    run_user_turn(&state, "s1", "write a script about the Romans", None).await;

    let events = drain(&mut rx);
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "script_writer");
    assert_eq!(calls[0].1["topic"], json!("The Romans"));

    assert_eq!(tool_results(&events), vec![("script_writer".to_string(), true)]);
    assert_eq!(gui_updates(&events), vec!["script_created"]);

    // Ordering: thinking < tool_call < tool_result < gui_update < final message.
    let i_think = position(&events, |p| matches!(p, EventPayload::Thinking { .. }));
    let i_call = position(&events, |p| matches!(p, EventPayload::ToolCall { .. }));
    let i_result = position(&events, |p| matches!(p, EventPayload::ToolResult { .. }));
    let i_gui = position(&events, |p| matches!(p, EventPayload::GuiUpdate { .. }));
    let i_final = events
        .iter()
        .rposition(|e| matches!(e.payload, EventPayload::AiMessage { .. }))
        .unwrap();
    assert!(i_think < i_call && i_call < i_result && i_result < i_gui && i_gui < i_final);

    let snap = state.sessions.snapshot("s1").unwrap();
    assert_eq!(snap.project.scripts.len(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: full video (also covers LLM-unavailable fallback planning)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn video_request_runs_full_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let (_, mut rx) = state.bus.channel("s1").attach(None);

    run_user_turn(&state, "s1", "make me a video on Messi", None).await;

    let events = drain(&mut rx);
    let expected = [
        "script_writer",
        "broll_finder",
        "voiceover_generator",
        "video_processor",
    ];
    let calls = tool_calls(&events);
    assert_eq!(
        calls.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
        expected
    );
    assert_eq!(
        tool_results(&events),
        expected
            .iter()
            .map(|t| (t.to_string(), true))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        gui_updates(&events),
        vec![
            "script_created",
            "media_downloaded",
            "voiceover_created",
            "video_created"
        ]
    );

    // workflow_complete carries every artifact.
    let artifacts = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::WorkflowComplete { artifacts, .. } => Some(artifacts.clone()),
            _ => None,
        })
        .expect("workflow_complete missing");
    assert!(artifacts["script"].is_string());
    assert_eq!(artifacts["media_files"].as_array().unwrap().len(), 8);
    assert!(artifacts["voiceover"].is_string());
    assert!(artifacts["final_video"].is_string());

    // The executions were recorded in cursor-advance order.
    let snap = state.sessions.snapshot("s1").unwrap();
    let recorded: Vec<&str> = snap
        .tool_executions
        .iter()
        .map(|e| e.tool_name.as_str())
        .collect();
    assert_eq!(recorded, expected);
}

#[tokio::test]
async fn fallback_plan_completes_without_llm() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    assert!(!state.llm.has_transport());
    let (_, mut rx) = state.bus.channel("s1").attach(None);

    run_user_turn(&state, "s1", "create a video about space", None).await;

    let events = drain(&mut rx);
    assert_eq!(tool_calls(&events).len(), 4);
    assert!(tool_results(&events).iter().all(|(_, ok)| *ok));
    assert!(events
        .iter()
        .any(|e| matches!(e.payload, EventPayload::WorkflowComplete { .. })));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: retry on transient tool error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A broll finder that is rate limited on its first call and succeeds
/// afterwards.
struct FlakyBroll {
    calls: AtomicU32,
    dir: std::path::PathBuf,
}

#[async_trait::async_trait]
impl Tool for FlakyBroll {
    fn name(&self) -> &str {
        "broll_finder"
    }
    fn description(&self) -> &str {
        "Search for and download B-roll media clips"
    }
    fn input_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert("topic".into(), ParamSpec::required(ParamType::String));
        s.insert("count".into(), ParamSpec::optional(ParamType::Integer, json!(8)));
        s.insert(
            "style".into(),
            ParamSpec::optional(ParamType::String, json!("cinematic")),
        );
        Some(s)
    }
    async fn run(&self, input: Map<String, Value>) -> cf_domain::Result<Map<String, Value>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Error::RateLimited("upstream said 429".into()));
        }
        let path = self.dir.join("clip_01.mp4");
        std::fs::write(&path, b"x")?;
        let mut out = Map::new();
        out.insert(
            "downloaded_files".into(),
            json!([path.to_string_lossy()]),
        );
        out.insert("count".into(), input.get("count").cloned().unwrap_or(json!(1)));
        Ok(out)
    }
}

#[tokio::test]
async fn transient_failure_retries_with_adjusted_args() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    // Replace the built-in broll finder with the flaky one.
    state.registry.register(Arc::new(FlakyBroll {
        calls: AtomicU32::new(0),
        dir: tmp.path().to_path_buf(),
    }));
    let (_, mut rx) = state.bus.channel("s1").attach(None);

    run_user_turn(&state, "s1", "find b-roll footage about Messi", None).await;

    let events = drain(&mut rx);
    let calls = tool_calls(&events);
    assert_eq!(calls.len(), 2, "one failed attempt plus one retry");
    assert_eq!(calls[0].1["count"], json!(8));
    // Rate limit: the planner halves the batch for the retry.
    assert_eq!(calls[1].1["count"], json!(4));

    assert_eq!(
        tool_results(&events),
        vec![
            ("broll_finder".to_string(), false),
            ("broll_finder".to_string(), true)
        ]
    );

    let snap = state.sessions.snapshot("s1").unwrap();
    let plan = snap.workflow.as_ref().unwrap().plan.clone();
    assert_eq!(plan.steps[0].retry_count, 1);
    // One execution record per invocation, including the failed one.
    assert_eq!(snap.tool_executions.len(), 2);
    assert_eq!(
        snap.tool_executions[0].error_kind.as_deref(),
        Some("rate_limited")
    );

    // The failure was learned for future planning.
    assert!(snap.preferences.contains_key("failure_patterns"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: terminal failure offers alternatives
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AlwaysFailingBroll;

#[async_trait::async_trait]
impl Tool for AlwaysFailingBroll {
    fn name(&self) -> &str {
        "broll_finder"
    }
    fn description(&self) -> &str {
        "Search for and download B-roll media clips"
    }
    fn input_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert("topic".into(), ParamSpec::required(ParamType::String));
        s.insert("count".into(), ParamSpec::optional(ParamType::Integer, json!(8)));
        s.insert(
            "style".into(),
            ParamSpec::optional(ParamType::String, json!("cinematic")),
        );
        Some(s)
    }
    async fn run(&self, _input: Map<String, Value>) -> cf_domain::Result<Map<String, Value>> {
        Err(Error::Execution("provider is down".into()))
    }
}

#[tokio::test]
async fn exhausted_retries_emit_alternatives_and_advance() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    state.registry.register(Arc::new(AlwaysFailingBroll));
    let (_, mut rx) = state.bus.channel("s1").attach(None);

    run_user_turn(&state, "s1", "find b-roll footage about Messi", None).await;

    let events = drain(&mut rx);
    // First attempt + full retry budget, all failing.
    assert_eq!(tool_calls(&events).len(), 4);
    assert!(tool_results(&events).iter().all(|(_, ok)| !ok));

    let alternatives = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::AlternativeSuggestions {
                failed_tool,
                alternatives,
            } => Some((failed_tool.clone(), alternatives.clone())),
            _ => None,
        })
        .expect("alternative_suggestions missing");
    assert_eq!(alternatives.0, "broll_finder");
    assert!(!alternatives.1.is_empty());

    // The loop still finishes the turn truthfully.
    let summary = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::WorkflowComplete { summary, .. } => Some(summary.clone()),
            _ => None,
        })
        .unwrap();
    assert!(summary.contains("broll_finder"));

    let snap = state.sessions.snapshot("s1").unwrap();
    let step = &snap.workflow.as_ref().unwrap().plan.steps[0];
    assert_eq!(step.retry_count, step.retry_budget);
    assert_eq!(snap.tool_executions.len(), 4);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario: reconnect mid-stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn reconnect_replays_from_last_seen_id() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());
    let channel = state.bus.channel("s1");
    let (first_conn, mut rx1) = channel.attach(None);

    run_user_turn(&state, "s1", "write a script about the Romans", None).await;

    let seen = drain(&mut rx1);
    channel.detach(first_conn);

    // Ring events only (connection-scoped ids are not replayable).
    let ring_ids: Vec<String> = seen
        .iter()
        .filter(|e| e.message_id.starts_with('m'))
        .map(|e| e.message_id.clone())
        .collect();
    assert!(ring_ids.len() >= 4);

    // Pretend we disconnected after the second ring event.
    let last_seen = &ring_ids[1];
    let (_, mut rx2) = channel.attach(Some(last_seen));
    let replayed = drain(&mut rx2);

    assert!(matches!(
        replayed[0].payload,
        EventPayload::ConnectionEstablished
    ));
    let replayed_ids: Vec<String> = replayed[1..]
        .iter()
        .map(|e| e.message_id.clone())
        .collect();
    assert_eq!(replayed_ids, ring_ids[2..].to_vec(), "no gaps, no duplicates");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Learning across turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn successful_steps_teach_preferences() {
    let tmp = tempfile::tempdir().unwrap();
    let state = test_state(tmp.path());

    run_user_turn(&state, "s1", "write a script about the Romans", None).await;

    let snap = state.sessions.snapshot("s1").unwrap();
    assert_eq!(snap.preferences["preferred_script_style"], json!("cinematic"));
    assert_eq!(
        snap.preferences["preferred_script_length"],
        json!("60 seconds")
    );
}
