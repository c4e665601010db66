//! The workflow planner: turns a user turn into a canonical response,
//! enriches step arguments from learned preferences, proposes follow-up
//! steps after each completion, and adjusts arguments for retries.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use cf_domain::config::RetrievalConfig;
use cf_domain::plan::{PlannedCall, PlannerResponse, Step};
use cf_providers::LlmClient;
use cf_retrieval::RetrievalIndex;
use cf_sessions::SessionStore;
use cf_tools::ToolRegistry;

/// Appended when the first reply failed to parse.
const STRICT_FORMAT_INSTRUCTION: &str = "\
Your previous reply could not be parsed. Respond with ONLY a single JSON \
object, no prose and no code fences, with a \"response_type\" field and a \
\"user_message\" field.";

/// Upper bound on steps accepted from one mid-loop decision.
const MAX_ADDITIONAL_STEPS: usize = 3;

pub struct Planner {
    llm: Arc<LlmClient>,
    registry: Arc<ToolRegistry>,
    retrieval: Arc<RetrievalIndex>,
    sessions: Arc<SessionStore>,
    history_slice: usize,
    retrieval_cfg: RetrievalConfig,
}

impl Planner {
    pub fn new(
        llm: Arc<LlmClient>,
        registry: Arc<ToolRegistry>,
        retrieval: Arc<RetrievalIndex>,
        sessions: Arc<SessionStore>,
        history_slice: usize,
        retrieval_cfg: RetrievalConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            retrieval,
            sessions,
            history_slice,
            retrieval_cfg,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Initial planning
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Plan the user turn. The reply is normalized into one of the
    /// canonical shapes; a second, stricter prompt is attempted on parse
    /// failure, after which the raw text is wrapped as conversational.
    pub async fn initial_response(&self, session_id: &str, user_prompt: &str) -> PlannerResponse {
        let prompt = self.build_planning_prompt(session_id, user_prompt).await;
        let raw = self.llm.generate_seeded(&prompt, user_prompt).await;

        if let Some(response) = parse_response(&raw) {
            return response;
        }

        tracing::warn!(session_id, "planner reply failed to parse; re-prompting strictly");
        let strict_prompt = format!("{prompt}\n\n{STRICT_FORMAT_INSTRUCTION}");
        let raw = self.llm.generate_seeded(&strict_prompt, user_prompt).await;
        if let Some(response) = parse_response(&raw) {
            return response;
        }

        PlannerResponse::Conversational {
            user_message: raw,
            context_hints: None,
        }
    }

    async fn build_planning_prompt(&self, session_id: &str, user_prompt: &str) -> String {
        let snapshot = self.sessions.snapshot(session_id);

        let history = snapshot
            .as_ref()
            .map(|s| {
                s.conversation_tail(self.history_slice)
                    .iter()
                    .map(|t| format!("{}: {}", t.role, t.content))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "No conversation yet".into());

        let project_state = snapshot
            .as_ref()
            .map(|s| s.project.summary())
            .unwrap_or_else(|| "Empty project".into());

        let preferences = snapshot
            .as_ref()
            .filter(|s| !s.preferences.is_empty())
            .map(|s| Value::Object(s.preferences.clone()).to_string())
            .unwrap_or_else(|| "none recorded".into());

        let rag_context = self
            .retrieval
            .context_for_query(user_prompt, self.retrieval_cfg.context_max_tokens)
            .await
            .unwrap_or_default();
        let rag_context = if rag_context.is_empty() {
            "No relevant prior context".into()
        } else {
            rag_context
        };

        format!(
            "Current request: {user_prompt}\n\n\
             Conversation so far:\n{history}\n\n\
             Project state: {project_state}\n\
             User preferences: {preferences}\n\n\
             Relevant prior context:\n{rag_context}\n\n\
             Decide whether this needs tools. Respond in the JSON format \
             described in your instructions."
        )
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Parameter enhancement
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Fill gaps in a step's args from learned `preferred_*` values.
    /// Explicit caller args always win.
    pub fn enhance_args(step: &mut Step, preferences: &Map<String, Value>) {
        let tool = step.tool.to_lowercase();
        let mut apply = |pref_key: &str, arg_key: &str| {
            if !step.args.contains_key(arg_key) {
                if let Some(value) = preferences.get(pref_key) {
                    step.args.insert(arg_key.to_string(), value.clone());
                }
            }
        };

        if tool.contains("script") {
            apply("preferred_script_style", "style");
            apply("preferred_script_length", "length");
        } else if tool.contains("broll") || tool.contains("media") {
            apply("preferred_media_style", "style");
            apply("preferred_media_count", "count");
        } else if tool.contains("voiceover") {
            apply("preferred_voiceover_voice", "voice");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Mid-loop decisions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Consult the model after a completed step: may return extra steps to
    /// append. Dependencies must name already-present step ids (unknown
    /// ones are dropped on append). Parse problems yield no additions.
    pub async fn decide_additional_steps(
        &self,
        completed: &Step,
        result: &Map<String, Value>,
        remaining: &[Step],
    ) -> Vec<Step> {
        let remaining_list = if remaining.is_empty() {
            "none".into()
        } else {
            remaining
                .iter()
                .map(|s| format!("{} ({})", s.step_id, s.tool))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let result_keys = result.keys().cloned().collect::<Vec<_>>().join(", ");
        let known_tools = self
            .registry
            .list()
            .iter()
            .map(|d| d.name.clone())
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            "Step '{}' using tool '{}' just completed. Result fields: {result_keys}.\n\
             Remaining planned steps: {remaining_list}.\n\
             Available tools: {known_tools}.\n\
             If (and only if) the remaining plan is missing something the \
             user's request needs, reply {{\"additional_steps\": [{{\"tool\", \
             \"args\", \"description\", \"step_id\", \"depends_on\"}}]}}. \
             Otherwise reply {{\"additional_steps\": []}}.",
            completed.step_id, completed.tool,
        );

        // Seeded with an empty string: with no model reachable, the
        // fallback reply carries no `additional_steps` and we add nothing.
        let raw = self.llm.generate_seeded(&prompt, "").await;
        let steps = parse_additional_steps(&raw);
        if !steps.is_empty() {
            tracing::info!(
                after = %completed.step_id,
                count = steps.len(),
                "planner appended steps mid-loop"
            );
        }
        steps
    }

    /// Deterministic argument adjustment for a retry, keyed on the error
    /// kind. Caller-visible behavior: rate limits shrink batch sizes,
    /// timeouts shorten the work, parameter errors fall back to safe
    /// defaults.
    pub fn adjust_args_for_retry(step: &Step, error_kind: &str) -> Map<String, Value> {
        let mut args = step.args.clone();
        let tool = step.tool.to_lowercase();

        match error_kind {
            "rate_limited" => {
                halve_count(&mut args);
            }
            "timeout" => {
                if args.contains_key("length") {
                    args.insert("length".into(), json!("30 seconds"));
                }
                halve_count(&mut args);
            }
            "validation_input" | "execution" => {
                if tool.contains("script") {
                    args.entry("style".to_string()).or_insert(json!("cinematic"));
                    args.entry("length".to_string())
                        .or_insert(json!("60 seconds"));
                } else if tool.contains("broll") || tool.contains("media") {
                    args.entry("count".to_string()).or_insert(json!(5));
                    args.entry("style".to_string()).or_insert(json!("cinematic"));
                } else if tool.contains("voiceover") {
                    args.entry("voice".to_string())
                        .or_insert(json!("professional"));
                }
            }
            _ => {}
        }
        args
    }

    /// Alternative actions offered to the user when a step fails
    /// terminally.
    pub fn alternative_suggestions(tool: &str) -> Vec<String> {
        let tool = tool.to_lowercase();
        let all: &[&str] = if tool.contains("script") {
            &[
                "Try creating the script with different parameters",
                "Use a simpler script style",
            ]
        } else if tool.contains("broll") || tool.contains("media") {
            &[
                "Try different search terms for the media",
                "Reduce the number of media files",
            ]
        } else if tool.contains("voiceover") {
            &["Try a different voice", "Use a shorter script"]
        } else if tool.contains("video") {
            &[
                "Try assembling with different settings",
                "Process a shorter video",
            ]
        } else {
            &["Try the action again with different parameters"]
        };
        all.iter().map(|s| s.to_string()).collect()
    }
}

fn halve_count(args: &mut Map<String, Value>) {
    if let Some(count) = args.get("count").and_then(|v| v.as_u64()) {
        args.insert("count".into(), json!((count / 2).max(1)));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tolerant response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize a raw model reply into a canonical response. Strips code
/// fences, locates the JSON object, and accepts near-miss shapes (a bare
/// `tool_calls` array, a bare `user_message`). Returns `None` only when
/// nothing canonical can be recovered.
pub fn parse_response(raw: &str) -> Option<PlannerResponse> {
    let json_text = extract_json(raw)?;

    if let Ok(response) = serde_json::from_str::<PlannerResponse>(&json_text) {
        return Some(response);
    }

    // Near-miss shapes: keep what we can.
    let value: Value = serde_json::from_str(&json_text).ok()?;
    let obj = value.as_object()?;

    if let Some(calls) = obj.get("tool_calls").and_then(|v| v.as_array()) {
        if !calls.is_empty() {
            let tool_calls: Vec<PlannedCall> = calls
                .iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect();
            if !tool_calls.is_empty() {
                return Some(PlannerResponse::Workflow {
                    user_message: obj
                        .get("user_message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Working on it!")
                        .to_string(),
                    reasoning: obj
                        .get("reasoning")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    tool_calls,
                });
            }
        }
    }

    obj.get("user_message")
        .and_then(|v| v.as_str())
        .map(|msg| PlannerResponse::Conversational {
            user_message: msg.to_string(),
            context_hints: None,
        })
}

/// Pull the JSON object out of a reply that may wrap it in code fences or
/// prose.
fn extract_json(raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(fence_end) = after.find("```") {
            let inner = after[..fence_end].trim();
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| trimmed[start..=end].to_string())
}

fn parse_additional_steps(raw: &str) -> Vec<Step> {
    let Some(json_text) = extract_json(raw) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<Value>(&json_text) else {
        return Vec::new();
    };
    let Some(entries) = value.get("additional_steps").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .take(MAX_ADDITIONAL_STEPS)
        .filter_map(|entry| {
            let tool = entry.get("tool")?.as_str()?.to_string();
            let args = entry
                .get("args")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            let description = entry
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or(&tool)
                .to_string();
            let step_id = entry
                .get("step_id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("step_{}", uuid::Uuid::new_v4().simple()));
            let mut step = Step::new(step_id, tool, description, args);
            if let Some(deps) = entry.get("depends_on").and_then(|v| v.as_array()) {
                step.depends_on = deps
                    .iter()
                    .filter_map(|d| d.as_str().map(String::from))
                    .collect();
            }
            Some(step)
        })
        .collect()
}
