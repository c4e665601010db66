//! The agent loop: a bounded state machine driving plan → execute →
//! verify → observe → decide iterations for one user turn.
//!
//! The loop is the only writer of its session's state. Observers learn
//! about progress through events on the session channel; the state variable
//! itself never leaves this module.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use cf_domain::config::StreamingMode;
use cf_domain::error::Error;
use cf_domain::event::{EventPayload, GuiUpdate};
use cf_domain::plan::{Plan, PlannerResponse, Step, StepStatus};
use cf_retrieval::RetrievalIndex;
use cf_sessions::{AssetKind, Role, SessionStore, WorkflowState};
use cf_tools::ToolExecutor;

use crate::stream::bus::SessionChannel;
use crate::stream::typing::stream_ai_message;

use super::cancel::ControlToken;
use super::planner::Planner;
use super::verify::verify_result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// States
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingPrompt,
    Planning,
    ExecutingStep,
    VerifyingStep,
    ObservingResult,
    DecidingNext,
    AwaitingUser,
    HandlingError,
    FinalCheck,
    Done,
    Paused,
}

impl LoopState {
    fn name(self) -> &'static str {
        match self {
            LoopState::AwaitingPrompt => "awaiting_prompt",
            LoopState::Planning => "planning",
            LoopState::ExecutingStep => "executing_step",
            LoopState::VerifyingStep => "verifying_step",
            LoopState::ObservingResult => "observing_result",
            LoopState::DecidingNext => "deciding_next",
            LoopState::AwaitingUser => "awaiting_user",
            LoopState::HandlingError => "handling_error",
            LoopState::FinalCheck => "final_check",
            LoopState::Done => "done",
            LoopState::Paused => "paused",
        }
    }

    /// States announced to observers via `workflow_status`.
    fn is_milestone(self) -> bool {
        matches!(
            self,
            LoopState::Planning
                | LoopState::ExecutingStep
                | LoopState::FinalCheck
                | LoopState::Done
                | LoopState::Paused
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentLoop {
    session_id: String,
    channel: Arc<SessionChannel>,
    planner: Arc<Planner>,
    executor: Arc<ToolExecutor>,
    sessions: Arc<SessionStore>,
    retrieval: Arc<RetrievalIndex>,
    control: ControlToken,

    max_iterations: u32,
    streaming_mode: StreamingMode,
    tool_timeout: Duration,

    state: LoopState,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        channel: Arc<SessionChannel>,
        planner: Arc<Planner>,
        executor: Arc<ToolExecutor>,
        sessions: Arc<SessionStore>,
        retrieval: Arc<RetrievalIndex>,
        control: ControlToken,
        max_iterations: u32,
        streaming_mode: StreamingMode,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            channel,
            planner,
            executor,
            sessions,
            retrieval,
            control,
            max_iterations,
            streaming_mode,
            tool_timeout,
            state: LoopState::AwaitingPrompt,
        }
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state == state {
            return;
        }
        tracing::debug!(
            session_id = %self.session_id,
            from = self.state.name(),
            to = state.name(),
            "loop transition"
        );
        self.state = state;
        if state.is_milestone() {
            self.channel.emit(EventPayload::WorkflowStatus {
                state: state.name().into(),
                message: String::new(),
            });
        }
    }

    /// Drive one user turn to `done`. Unrecoverable errors become an
    /// `error` event plus a truthful assistant message — no raw internals
    /// reach the user.
    pub async fn run(&mut self, user_message: &str) {
        if let Err(e) = self.run_inner(user_message).await {
            tracing::error!(session_id = %self.session_id, error = %e, "turn failed");
            self.channel.emit(EventPayload::Error {
                message: format!("Something went wrong while {}", failing_phase(self.state)),
            });
            let apology =
                "I hit a problem I couldn't recover from while working on that. \
                 Nothing else was changed — feel free to try again.";
            stream_ai_message(&self.channel, apology, StreamingMode::Off).await;
            self.sessions
                .push_conversation(&self.session_id, Role::Assistant, apology);
        }
        self.set_state(LoopState::Done);
    }

    async fn run_inner(&mut self, user_message: &str) -> cf_domain::Result<()> {
        // Record the user turn before anything can fail.
        self.sessions
            .push_conversation(&self.session_id, Role::User, user_message);
        let _ = self
            .retrieval
            .add_conversation(
                &self.session_id,
                &[("user".to_string(), user_message.to_string())],
            )
            .await;

        self.set_state(LoopState::Planning);
        self.channel
            .emit(EventPayload::thinking("Analyzing your request..."));

        let response = self
            .planner
            .initial_response(&self.session_id, user_message)
            .await;

        match response {
            PlannerResponse::Workflow {
                user_message: announce,
                reasoning,
                tool_calls,
            } => {
                if !reasoning.is_empty() {
                    self.channel.emit(EventPayload::thinking(reasoning));
                }
                self.respond(&announce).await;
                let plan = self.build_plan(tool_calls);
                self.run_workflow(plan).await;
            }

            PlannerResponse::Adaptive {
                user_message,
                context_update,
                preferences,
                ..
            } => {
                if !context_update.is_empty() {
                    self.sessions
                        .update_session_context(&self.session_id, context_update);
                }
                if !preferences.is_empty() {
                    self.sessions
                        .merge_preferences(&self.session_id, preferences);
                }
                self.respond(&user_message).await;
            }

            PlannerResponse::Interactive { user_message, .. } => {
                self.set_state(LoopState::AwaitingUser);
                self.respond(&user_message).await;
            }

            PlannerResponse::Conversational { user_message, .. }
            | PlannerResponse::Informational { user_message, .. } => {
                self.respond(&user_message).await;
            }
        }

        Ok(())
    }

    /// Stream an assistant message and retain it in conversation history.
    async fn respond(&self, content: &str) {
        if content.is_empty() {
            return;
        }
        stream_ai_message(&self.channel, content, self.streaming_mode).await;
        self.sessions
            .push_conversation(&self.session_id, Role::Assistant, content);
        let _ = self
            .retrieval
            .add_conversation(
                &self.session_id,
                &[("assistant".to_string(), content.to_string())],
            )
            .await;
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Plan construction
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn build_plan(&self, tool_calls: Vec<cf_domain::plan::PlannedCall>) -> Plan {
        let preferences = self
            .sessions
            .snapshot(&self.session_id)
            .map(|s| s.preferences)
            .unwrap_or_default();

        let steps: Vec<Step> = tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, call)| {
                let step_id = call
                    .step_id
                    .unwrap_or_else(|| format!("step_{}", i + 1));
                let description = if call.description.is_empty() {
                    call.tool.clone()
                } else {
                    call.description
                };
                let mut step = Step::new(step_id, call.tool, description, call.args);
                Planner::enhance_args(&mut step, &preferences);
                step
            })
            .collect();

        let mut plan = Plan::new(steps);
        // Rough wall-clock hint for the UI; tools average well under a
        // minute each.
        plan.estimated_duration = Some(format!("~{}s", plan.steps.len() * 30));
        plan
    }

    fn sync_workflow_state(&self, plan: &Plan, cursor: usize, iteration: u32) {
        let state = WorkflowState {
            plan: plan.clone(),
            cursor,
            iteration,
        };
        self.sessions.with_session(&self.session_id, |s| {
            s.workflow = Some(state);
        });
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Workflow execution
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn run_workflow(&mut self, mut plan: Plan) {
        self.set_state(LoopState::ExecutingStep);
        let mut cursor = 0usize;
        let mut iteration = 0u32;
        self.sync_workflow_state(&plan, cursor, iteration);

        'iterations: while iteration < self.max_iterations {
            iteration += 1;
            // Steps appended by decide-next during this pass run in the
            // next iteration, so the iteration budget bounds append rounds.
            let bound = plan.steps.len();
            tracing::debug!(
                session_id = %self.session_id,
                iteration,
                steps = bound,
                "workflow iteration"
            );

            loop {
                // Honor pause before committing to the next step.
                if self.control.is_paused() {
                    self.set_state(LoopState::Paused);
                    self.control.wait_if_paused().await;
                    self.set_state(LoopState::ExecutingStep);
                }
                if self.control.is_cancelled() {
                    self.drain_cancelled(&mut plan);
                    self.sync_workflow_state(&plan, cursor, iteration);
                    return;
                }

                let Some(idx) = plan.next_runnable(0).filter(|i| *i < bound) else {
                    break;
                };
                cursor = idx;
                self.execute_step(&mut plan, idx).await;
                self.sync_workflow_state(&plan, cursor, iteration);
            }

            // A decide-next consultation may have appended steps that are
            // blocked only by iteration budget; otherwise we are done.
            if plan.next_runnable(0).is_none() {
                break 'iterations;
            }
        }

        let exhausted = plan.next_runnable(0).is_some();
        self.finish_workflow(&plan, exhausted).await;
        self.sync_workflow_state(&plan, cursor, iteration);
    }

    async fn execute_step(&mut self, plan: &mut Plan, idx: usize) {
        let (step_id, tool, args, description) = {
            let step = &mut plan.steps[idx];
            step.status = StepStatus::Running;
            (
                step.step_id.clone(),
                step.tool.clone(),
                step.args.clone(),
                step.description.clone(),
            )
        };

        self.channel.emit(EventPayload::ToolCall {
            tool: tool.clone(),
            args: Value::Object(args.clone()),
            step_id: step_id.clone(),
            description,
        });
        self.channel.emit(EventPayload::Progress {
            step_id: step_id.clone(),
            percent: 0.0,
            status: "running".into(),
        });

        let mut context = Map::new();
        context.insert("session_id".into(), json!(self.session_id));
        let result = self
            .executor
            .execute(&tool, args, &context, Some(self.tool_timeout))
            .await;

        match result {
            Ok(output) => {
                self.channel.emit(EventPayload::ToolResult {
                    tool: tool.clone(),
                    step_id: step_id.clone(),
                    success: true,
                    result: Some(Value::Object(output.clone())),
                    error: None,
                    error_kind: None,
                });

                self.set_state(LoopState::VerifyingStep);
                if verify_result(&tool, &output) {
                    self.complete_step(plan, idx, output).await;
                } else {
                    tracing::warn!(
                        session_id = %self.session_id,
                        step_id = %step_id,
                        tool = %tool,
                        "result failed verification"
                    );
                    self.retry_or_accept_failure(plan, idx, "execution", "result failed verification")
                        .await;
                }
            }
            Err(e) => {
                self.channel.emit(EventPayload::ToolResult {
                    tool: tool.clone(),
                    step_id: step_id.clone(),
                    success: false,
                    result: None,
                    error: Some(user_facing_error(&tool, &e)),
                    error_kind: Some(e.kind().into()),
                });

                self.set_state(LoopState::HandlingError);
                self.record_failure_pattern(&tool, &plan.steps[idx].args, &e);
                self.retry_or_accept_failure(plan, idx, e.kind(), &e.to_string())
                    .await;
            }
        }
        self.set_state(LoopState::ExecutingStep);
    }

    async fn complete_step(&mut self, plan: &mut Plan, idx: usize, output: Map<String, Value>) {
        {
            let step = &mut plan.steps[idx];
            step.status = StepStatus::Completed;
            step.result = Some(Value::Object(output.clone()));
            step.error = None;
        }
        let step = plan.steps[idx].clone();

        self.set_state(LoopState::ObservingResult);
        self.observe_success(&step, &output).await;

        self.channel.emit(EventPayload::Progress {
            step_id: step.step_id.clone(),
            percent: 100.0,
            status: "completed".into(),
        });
        self.channel.emit(EventPayload::WorkflowProgress {
            percent: plan.progress() * 100.0,
            completed_steps: plan.completed_count(),
            total_steps: plan.steps.len(),
        });

        self.set_state(LoopState::DecidingNext);
        let remaining: Vec<Step> = plan
            .steps
            .iter()
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect();
        let additional = self
            .planner
            .decide_additional_steps(&step, &output, &remaining)
            .await;
        if !additional.is_empty() {
            plan.append(additional);
        }
    }

    /// Shared retry logic for failed execution and failed verification.
    async fn retry_or_accept_failure(
        &mut self,
        plan: &mut Plan,
        idx: usize,
        error_kind: &str,
        error: &str,
    ) {
        let step = &mut plan.steps[idx];
        if step.can_retry() {
            step.retry_count += 1;
            step.args = Planner::adjust_args_for_retry(step, error_kind);
            step.status = StepStatus::Pending;
            self.channel.emit(EventPayload::thinking(format!(
                "That didn't work ({}). Adjusting and retrying ({}/{})...",
                short_reason(error_kind),
                step.retry_count,
                step.retry_budget,
            )));
        } else {
            step.status = StepStatus::Failed;
            step.error = Some(error.to_string());
            let tool = step.tool.clone();
            let step_id = step.step_id.clone();

            self.channel.emit(EventPayload::Progress {
                step_id,
                percent: 100.0,
                status: "failed".into(),
            });
            self.channel.emit(EventPayload::AlternativeSuggestions {
                failed_tool: tool.clone(),
                alternatives: Planner::alternative_suggestions(&tool),
            });
        }
    }

    fn record_failure_pattern(&self, tool: &str, args: &Map<String, Value>, error: &Error) {
        self.sessions.with_session(&self.session_id, |s| {
            let patterns = s
                .preferences
                .entry("failure_patterns".to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = patterns {
                list.push(json!({
                    "tool": tool,
                    "args": Value::Object(args.clone()),
                    "error_kind": error.kind(),
                    "error": error.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }));
            }
        });
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Observation: assets, learning, GUI updates
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn observe_success(&self, step: &Step, output: &Map<String, Value>) {
        let tool = step.tool.to_lowercase();

        if tool.contains("script") {
            if let Some(script) = output.get("script_text").and_then(|v| v.as_str()) {
                self.sessions.add_asset(
                    &self.session_id,
                    AssetKind::Script,
                    &step.tool,
                    json!({
                        "content": script,
                        "topic": step.args.get("topic").cloned().unwrap_or(Value::Null),
                        "style": step.args.get("style").cloned().unwrap_or(Value::Null),
                    }),
                );
                self.sessions.update_ai_context(&self.session_id, {
                    let mut m = Map::new();
                    m.insert("script".into(), json!(script));
                    m
                });
                let _ = self.retrieval.add_script(&self.session_id, script).await;
                self.learn(&[
                    ("preferred_script_style", step.args.get("style")),
                    ("preferred_script_length", step.args.get("length")),
                ]);
                self.channel.emit(EventPayload::GuiUpdate {
                    update: GuiUpdate::ScriptCreated {
                        script_content: script.to_string(),
                    },
                });
            }
        } else if tool.contains("broll") || tool.contains("media") {
            let files: Vec<String> = output
                .get("downloaded_files")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|f| f.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            for file in &files {
                self.sessions.add_asset(
                    &self.session_id,
                    AssetKind::MediaFile,
                    &step.tool,
                    json!({ "path": file }),
                );
            }
            self.learn(&[
                ("preferred_media_style", step.args.get("style")),
                ("preferred_media_count", step.args.get("count")),
            ]);
            self.channel.emit(EventPayload::GuiUpdate {
                update: GuiUpdate::MediaDownloaded { media_files: files },
            });
        } else if tool.contains("voiceover") {
            if let Some(audio_path) = output.get("audio_path").and_then(|v| v.as_str()) {
                self.sessions.add_asset(
                    &self.session_id,
                    AssetKind::Voiceover,
                    &step.tool,
                    json!({
                        "audio_path": audio_path,
                        "voice": step.args.get("voice").cloned().unwrap_or(Value::Null),
                    }),
                );
                self.learn(&[("preferred_voiceover_voice", step.args.get("voice"))]);
                self.channel.emit(EventPayload::GuiUpdate {
                    update: GuiUpdate::VoiceoverCreated {
                        audio_path: audio_path.to_string(),
                    },
                });
            }
        } else if tool.contains("video") || tool.contains("processor") {
            if let Some(video_path) = output.get("video_path").and_then(|v| v.as_str()) {
                let thumbnail = output
                    .get("thumbnail")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                self.sessions.add_asset(
                    &self.session_id,
                    AssetKind::Video,
                    &step.tool,
                    json!({ "video_path": video_path, "thumbnail": thumbnail }),
                );
                self.channel.emit(EventPayload::GuiUpdate {
                    update: GuiUpdate::VideoCreated {
                        video_path: video_path.to_string(),
                        thumbnail,
                    },
                });
            }
        }
    }

    /// Write `preferred_*` entries for args the user (or planner) actually
    /// set on a successful step.
    fn learn(&self, entries: &[(&str, Option<&Value>)]) {
        let mut patch = Map::new();
        for (key, value) in entries {
            if let Some(value) = value {
                patch.insert(key.to_string(), (*value).clone());
            }
        }
        if !patch.is_empty() {
            self.sessions.merge_preferences(&self.session_id, patch);
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Completion
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn finish_workflow(&mut self, plan: &Plan, budget_exhausted: bool) {
        self.set_state(LoopState::FinalCheck);

        let snapshot = self.sessions.snapshot(&self.session_id);
        let project = snapshot.map(|s| s.project).unwrap_or_default();

        let script = project
            .scripts
            .last()
            .and_then(|a| a.data.get("content").cloned());
        let media_files: Vec<Value> = project
            .media_files
            .iter()
            .filter_map(|a| a.data.get("path").cloned())
            .collect();
        let voiceover = project
            .voiceovers
            .last()
            .and_then(|a| a.data.get("audio_path").cloned());
        let final_video = project
            .videos
            .last()
            .and_then(|a| a.data.get("video_path").cloned());

        let failed: Vec<&Step> = plan
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .collect();

        let summary = compose_summary(
            script.is_some(),
            !media_files.is_empty(),
            voiceover.is_some(),
            final_video.is_some(),
            &failed,
            budget_exhausted,
        );

        let artifacts = json!({
            "script": script,
            "media_files": media_files,
            "voiceover": voiceover,
            "final_video": final_video,
        });

        self.channel.emit(EventPayload::WorkflowComplete {
            summary: summary.clone(),
            artifacts,
        });
        self.respond(&summary).await;
    }

    fn drain_cancelled(&mut self, plan: &mut Plan) {
        for step in plan.steps.iter_mut().filter(|s| !s.is_terminal()) {
            step.status = StepStatus::Cancelled;
        }
        self.channel.emit(EventPayload::WorkflowStatus {
            state: "cancelled".into(),
            message: "Workflow stopped; starting on your new message.".into(),
        });
        tracing::info!(session_id = %self.session_id, "workflow cancelled");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message composition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truthful completion message from what actually exists.
fn compose_summary(
    has_script: bool,
    has_media: bool,
    has_voiceover: bool,
    has_video: bool,
    failed: &[&Step],
    budget_exhausted: bool,
) -> String {
    let mut produced = Vec::new();
    if has_script {
        produced.push("a script");
    }
    if has_media {
        produced.push("B-roll media");
    }
    if has_voiceover {
        produced.push("a voiceover");
    }
    if has_video {
        produced.push("the final video");
    }

    let mut message = if has_script && has_media && has_voiceover && has_video {
        "Your video is complete! I wrote the script, gathered B-roll, generated \
         the voiceover, and assembled everything into the final cut."
            .to_string()
    } else if has_script && produced.len() == 1 {
        "Script ready! Want me to find B-roll media to go with it, or generate \
         a voiceover?"
            .to_string()
    } else if has_media && produced.len() == 1 {
        "Media collected! Should I write a script to go with these visuals?".to_string()
    } else if produced.is_empty() {
        "I wasn't able to produce the requested artifacts this time.".to_string()
    } else {
        format!("Here's where things stand: I produced {}.", produced.join(", "))
    };

    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|s| s.tool.as_str()).collect();
        message.push_str(&format!(
            " One part didn't succeed despite retries: {}.",
            names.join(", ")
        ));
    }
    if budget_exhausted {
        message.push_str(" I stopped here to stay within my step budget for this turn.");
    }
    message
}

/// Short, stack-trace-free failure description for events.
fn user_facing_error(tool: &str, error: &Error) -> String {
    format!("{tool} failed: {}", short_reason(error.kind()))
}

fn short_reason(kind: &str) -> &str {
    match kind {
        "validation_input" => "the inputs were invalid",
        "validation_output" => "the result had an unexpected shape",
        "timeout" => "it took too long",
        "not_found" => "the tool is not available",
        "rate_limited" => "the service is rate limiting us",
        "unauthorized" => "the service rejected our credentials",
        "execution" => "the tool reported an error",
        _ => "an internal error occurred",
    }
}

fn failing_phase(state: LoopState) -> &'static str {
    match state {
        LoopState::Planning => "planning your request",
        LoopState::ExecutingStep | LoopState::VerifyingStep => "running the workflow",
        LoopState::ObservingResult | LoopState::DecidingNext => "processing tool results",
        _ => "handling your request",
    }
}
