//! In-memory session store: the durable working memory of each session for
//! its lifetime.
//!
//! A session is mutated exclusively through the store's closure-based
//! accessors (the agent loop is the sole writer); transport-side readers get
//! cloned snapshots. Sessions are created lazily on first use and evicted
//! after a configurable idle window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cf_domain::plan::Plan;
use cf_domain::tool::ToolExecution;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session pieces
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One produced artifact in a project bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Tool that produced the artifact.
    pub produced_by: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    MediaFile,
    Voiceover,
    Video,
}

/// Named asset buckets of a session's project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectAssets {
    pub scripts: Vec<AssetRecord>,
    pub media_files: Vec<AssetRecord>,
    pub voiceovers: Vec<AssetRecord>,
    pub videos: Vec<AssetRecord>,
}

impl ProjectAssets {
    pub fn bucket(&self, kind: AssetKind) -> &Vec<AssetRecord> {
        match kind {
            AssetKind::Script => &self.scripts,
            AssetKind::MediaFile => &self.media_files,
            AssetKind::Voiceover => &self.voiceovers,
            AssetKind::Video => &self.videos,
        }
    }

    fn bucket_mut(&mut self, kind: AssetKind) -> &mut Vec<AssetRecord> {
        match kind {
            AssetKind::Script => &mut self.scripts,
            AssetKind::MediaFile => &mut self.media_files,
            AssetKind::Voiceover => &mut self.voiceovers,
            AssetKind::Video => &mut self.videos,
        }
    }

    /// Short human summary ("Scripts: 1, Media: 8") for planner prompts.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.scripts.is_empty() {
            parts.push(format!("Scripts: {}", self.scripts.len()));
        }
        if !self.media_files.is_empty() {
            parts.push(format!("Media: {}", self.media_files.len()));
        }
        if !self.voiceovers.is_empty() {
            parts.push(format!("Voiceovers: {}", self.voiceovers.len()));
        }
        if !self.videos.is_empty() {
            parts.push(format!("Videos: {}", self.videos.len()));
        }
        if parts.is_empty() {
            "Empty project".into()
        } else {
            parts.join(", ")
        }
    }
}

/// The current plan plus the loop's cursor into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub plan: Plan,
    pub cursor: usize,
    pub iteration: u32,
}

/// All per-session mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,

    pub conversation: VecDeque<ConversationTurn>,
    /// Session-level patches applied via context updates. Highest priority
    /// in the comprehensive view.
    pub context: Map<String, Value>,
    pub frontend_state: Option<Value>,
    /// Planner scratch space.
    pub ai_context: Map<String, Value>,
    pub project: ProjectAssets,
    pub preferences: Map<String, Value>,
    pub tool_executions: Vec<ToolExecution>,
    pub workflow: Option<WorkflowState>,

    // Per-bucket freshness stamps used to resolve conflicts in the
    // comprehensive view.
    context_stamp: DateTime<Utc>,
    frontend_stamp: DateTime<Utc>,
    ai_stamp: DateTime<Utc>,
}

impl Session {
    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            created_at: now,
            last_updated: now,
            conversation: VecDeque::new(),
            context: Map::new(),
            frontend_state: None,
            ai_context: Map::new(),
            project: ProjectAssets::default(),
            preferences: Map::new(),
            tool_executions: Vec::new(),
            workflow: None,
            context_stamp: now,
            frontend_stamp: now,
            ai_stamp: now,
        }
    }

    /// Last `n` conversation turns, oldest first.
    pub fn conversation_tail(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.conversation.len().saturating_sub(n);
        self.conversation.iter().skip(skip).cloned().collect()
    }

    /// Unified view across buckets. Overlapping fields resolve to the
    /// freshest bucket; on equal stamps, session patches beat the frontend
    /// snapshot, which beats planner scratch.
    pub fn comprehensive_context(&self) -> Map<String, Value> {
        // (stamp, priority, bucket) — sorted ascending so the winner is
        // written last.
        let frontend: Map<String, Value> = self
            .frontend_state
            .as_ref()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        let mut buckets = [
            (self.ai_stamp, 0u8, &self.ai_context),
            (self.frontend_stamp, 1u8, &frontend),
            (self.context_stamp, 2u8, &self.context),
        ];
        buckets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut merged = Map::new();
        for (_, _, bucket) in buckets {
            for (k, v) in bucket.iter() {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    conversation_cap: usize,
}

impl SessionStore {
    pub fn new(conversation_cap: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            conversation_cap: conversation_cap.max(1),
        }
    }

    /// Create the session if it does not exist. Returns `true` when newly
    /// created.
    pub fn resolve_or_create(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session_id) {
            return false;
        }
        sessions.insert(session_id.to_string(), Session::new(session_id));
        tracing::info!(session_id, "session created");
        true
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Cloned snapshot for readers outside the agent loop.
    pub fn snapshot(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Run `f` against the mutable session, creating it on demand.
    /// Stamps `last_updated`.
    pub fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        let result = f(session);
        session.last_updated = Utc::now();
        result
    }

    // ── Update rules ───────────────────────────────────────────────

    /// Shallow-merge `patch` into the session-level context bucket.
    pub fn update_session_context(&self, session_id: &str, patch: Map<String, Value>) {
        self.with_session(session_id, |s| {
            for (k, v) in patch {
                s.context.insert(k, v);
            }
            s.context_stamp = Utc::now();
        });
    }

    /// Shallow-merge into the planner scratch bucket.
    pub fn update_ai_context(&self, session_id: &str, patch: Map<String, Value>) {
        self.with_session(session_id, |s| {
            for (k, v) in patch {
                s.ai_context.insert(k, v);
            }
            s.ai_stamp = Utc::now();
        });
    }

    /// Append a conversation turn, trimming to the retention cap.
    /// User turns are never displaced by anything but newer turns.
    pub fn push_conversation(&self, session_id: &str, role: Role, content: impl Into<String>) {
        let cap = self.conversation_cap;
        self.with_session(session_id, |s| {
            s.conversation.push_back(ConversationTurn {
                role,
                content: content.into(),
                timestamp: Utc::now(),
            });
            while s.conversation.len() > cap {
                s.conversation.pop_front();
            }
        });
    }

    /// Append an artifact record to a project bucket.
    pub fn add_asset(&self, session_id: &str, kind: AssetKind, produced_by: &str, data: Value) {
        self.with_session(session_id, |s| {
            s.project.bucket_mut(kind).push(AssetRecord {
                produced_by: produced_by.to_string(),
                data,
                timestamp: Utc::now(),
            });
        });
    }

    /// Append to the tool-execution log.
    pub fn record_execution(&self, session_id: &str, execution: ToolExecution) {
        self.with_session(session_id, |s| {
            s.tool_executions.push(execution);
        });
    }

    /// Shallow-merge preference updates.
    pub fn merge_preferences(&self, session_id: &str, patch: Map<String, Value>) {
        self.with_session(session_id, |s| {
            for (k, v) in patch {
                s.preferences.insert(k, v);
            }
        });
    }

    /// Replace the frontend snapshot and mirror its most recent script into
    /// both the planner scratch and the project bucket, so the script the
    /// user sees and the script the planner reasons about never diverge.
    pub fn sync_frontend_state(&self, session_id: &str, snapshot: Value) {
        let script = extract_latest_script(&snapshot);
        self.with_session(session_id, |s| {
            s.frontend_state = Some(snapshot);
            s.frontend_stamp = Utc::now();

            if let Some(script) = script {
                let already_known = s
                    .project
                    .scripts
                    .last()
                    .and_then(|r| r.data.get("content"))
                    .and_then(|v| v.as_str())
                    == Some(script.as_str());

                s.ai_context
                    .insert("script".into(), Value::String(script.clone()));
                s.ai_stamp = Utc::now();

                if !already_known {
                    s.project.scripts.push(AssetRecord {
                        produced_by: "frontend".into(),
                        data: serde_json::json!({ "content": script }),
                        timestamp: Utc::now(),
                    });
                }
            }
        });
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Remove the session entirely.
    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Evict sessions idle longer than `max_idle`. Returns evicted ids.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self.sessions.write();
        let evicted: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.last_updated < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &evicted {
            sessions.remove(id);
            tracing::info!(session_id = %id, "session evicted after idle timeout");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// The most recent script carried by a frontend snapshot: last entry of a
/// `scripts` array (object `content` field or plain string), else a direct
/// `script` string field.
fn extract_latest_script(snapshot: &Value) -> Option<String> {
    if let Some(scripts) = snapshot.get("scripts").and_then(|v| v.as_array()) {
        if let Some(latest) = scripts.last() {
            let content = latest
                .get("content")
                .and_then(|v| v.as_str())
                .or_else(|| latest.as_str());
            if let Some(content) = content {
                if !content.is_empty() {
                    return Some(content.to_string());
                }
            }
        }
    }
    snapshot
        .get("script")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn conversation_is_capped() {
        let store = SessionStore::new(50);
        for i in 0..60 {
            store.push_conversation("s1", Role::User, format!("msg {i}"));
        }
        let snap = store.snapshot("s1").unwrap();
        assert_eq!(snap.conversation.len(), 50);
        // Oldest retained message is msg 10.
        assert_eq!(snap.conversation.front().unwrap().content, "msg 10");
        assert_eq!(snap.conversation.back().unwrap().content, "msg 59");
    }

    #[test]
    fn conversation_tail_returns_most_recent() {
        let store = SessionStore::new(50);
        for i in 0..5 {
            store.push_conversation("s1", Role::User, format!("msg {i}"));
        }
        let snap = store.snapshot("s1").unwrap();
        let tail = snap.conversation_tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "msg 3");
        assert_eq!(tail[1].content, "msg 4");
    }

    #[test]
    fn frontend_sync_extracts_script_into_both_views() {
        let store = SessionStore::new(50);
        store.sync_frontend_state(
            "s1",
            json!({
                "scripts": [
                    {"content": "old draft"},
                    {"content": "ROME. An empire of stone and ambition."}
                ]
            }),
        );

        let snap = store.snapshot("s1").unwrap();
        assert_eq!(
            snap.ai_context["script"],
            json!("ROME. An empire of stone and ambition.")
        );
        assert_eq!(snap.project.scripts.len(), 1);
        assert_eq!(
            snap.project.scripts[0].data["content"],
            json!("ROME. An empire of stone and ambition.")
        );

        // Re-syncing the same snapshot does not duplicate the asset.
        store.sync_frontend_state(
            "s1",
            json!({ "scripts": [{"content": "ROME. An empire of stone and ambition."}] }),
        );
        assert_eq!(store.snapshot("s1").unwrap().project.scripts.len(), 1);
    }

    #[test]
    fn comprehensive_context_prefers_freshest_bucket() {
        let store = SessionStore::new(50);
        store.update_ai_context("s1", map(&[("topic", json!("old")), ("style", json!("noir"))]));
        // Later write to the session-level bucket wins on the shared key.
        store.update_session_context("s1", map(&[("topic", json!("new"))]));

        let snap = store.snapshot("s1").unwrap();
        let ctx = snap.comprehensive_context();
        assert_eq!(ctx["topic"], json!("new"));
        assert_eq!(ctx["style"], json!("noir"));
    }

    #[test]
    fn assets_carry_producer_and_timestamp() {
        let store = SessionStore::new(50);
        store.add_asset(
            "s1",
            AssetKind::Voiceover,
            "voiceover_generator",
            json!({"audio_path": "/tmp/vo.wav"}),
        );
        let snap = store.snapshot("s1").unwrap();
        assert_eq!(snap.project.voiceovers[0].produced_by, "voiceover_generator");
        assert_eq!(snap.project.summary(), "Voiceovers: 1");
    }

    #[test]
    fn idle_eviction_removes_stale_sessions() {
        let store = SessionStore::new(50);
        store.resolve_or_create("stale");
        // Fake staleness by backdating the session.
        {
            let mut sessions = store.sessions.write();
            sessions.get_mut("stale").unwrap().last_updated =
                Utc::now() - Duration::minutes(500);
        }
        store.resolve_or_create("fresh");

        let evicted = store.evict_idle(Duration::minutes(120));
        assert_eq!(evicted, vec!["stale".to_string()]);
        assert!(store.exists("fresh"));
        assert!(!store.exists("stale"));
    }
}
