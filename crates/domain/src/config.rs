//! Application configuration, loaded from TOML with per-field defaults so a
//! missing file yields a fully working development setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub projects: ProjectsConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// CORS origins allowed on the HTTP/WS surface. Empty = allow any
    /// (development).
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            cors_origins: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions base URL of any OpenAI-compatible endpoint.
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    /// API key. `None` (and no `CLIPFORGE_LLM_API_KEY` env) means the
    /// client runs on the rule-based fallback generator only.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_llm_model")]
    pub model: String,
    /// Per-attempt request timeout.
    #[serde(default = "d_60")]
    pub timeout_secs: u64,
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    /// Base of the exponential backoff between attempts, in seconds.
    #[serde(default = "d_2")]
    pub backoff_base_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            api_key: None,
            model: d_llm_model(),
            timeout_secs: d_60(),
            max_attempts: d_3(),
            backoff_base_secs: d_2(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Most recent conversation messages retained per session.
    #[serde(default = "d_50")]
    pub conversation_cap: usize,
    /// Messages included in planner prompts.
    #[serde(default = "d_10")]
    pub planner_history: usize,
    /// Sessions idle longer than this are eligible for eviction.
    #[serde(default = "d_120")]
    pub idle_minutes: u32,
    #[serde(default = "d_300")]
    pub eviction_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            conversation_cap: d_50(),
            planner_history: d_10(),
            idle_minutes: d_120(),
            eviction_interval_secs: d_300(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus / tools / retrieval / agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Ring-buffer capacity per session; oldest events drop when full.
    #[serde(default = "d_100")]
    pub buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: d_100(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default tool invocation timeout.
    #[serde(default = "d_tool_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "d_5")]
    pub top_k: usize,
    #[serde(default = "d_threshold")]
    pub threshold: f32,
    /// Whitespace-token budget for planner context assembled from hits.
    #[serde(default = "d_2000")]
    pub context_max_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: d_5(),
            threshold: d_threshold(),
            context_max_tokens: d_2000(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// ~20 ms per character, longer on punctuation.
    Character,
    /// ~30 ms per word, longer on sentence enders.
    Word,
    /// Emit assistant text as one event (tests, headless callers).
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent iterations allowed per user turn.
    #[serde(default = "d_3")]
    pub max_iterations: u32,
    #[serde(default = "d_streaming_mode")]
    pub streaming_mode: StreamingMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_3(),
            streaming_mode: d_streaming_mode(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsConfig {
    /// Root directory holding one subdirectory per project id.
    #[serde(default = "d_projects_root")]
    pub root: PathBuf,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            root: d_projects_root(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl Config {
    /// Sanity-check the loaded configuration. Errors abort startup;
    /// warnings are logged and the server continues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.events.buffer_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "events.buffer_size must be at least 1".into(),
            });
        }
        if self.agent.max_iterations == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "agent.max_iterations must be at least 1".into(),
            });
        }
        if self.sessions.planner_history > self.sessions.conversation_cap {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "sessions.planner_history ({}) exceeds conversation_cap ({}); the cap wins",
                    self.sessions.planner_history, self.sessions.conversation_cap
                ),
            });
        }
        if self.llm.api_key.is_none() && std::env::var("CLIPFORGE_LLM_API_KEY").is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "no LLM API key configured; planner runs on the rule-based fallback"
                    .into(),
            });
        }

        issues
    }
}

// ── serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8750
}
fn d_llm_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_llm_model() -> String {
    "gpt-4o-mini".into()
}
fn d_2() -> u64 {
    2
}
fn d_3() -> u32 {
    3
}
fn d_5() -> usize {
    5
}
fn d_10() -> usize {
    10
}
fn d_50() -> usize {
    50
}
fn d_60() -> u64 {
    60
}
fn d_100() -> usize {
    100
}
fn d_120() -> u32 {
    120
}
fn d_300() -> u64 {
    300
}
fn d_2000() -> usize {
    2000
}
fn d_tool_timeout() -> u64 {
    300
}
fn d_threshold() -> f32 {
    0.5
}
fn d_streaming_mode() -> StreamingMode {
    StreamingMode::Word
}
fn d_projects_root() -> PathBuf {
    PathBuf::from("./data/projects")
}
