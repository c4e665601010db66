//! Wire types for the session channel: the outbound event envelope and the
//! inbound client message union.
//!
//! Every outbound event shares the same envelope (`message_id`, `session_id`,
//! `type`, `timestamp`); the variant payload is flattened next to it. Message
//! ids are assigned by the event bus and are unique and monotonic per
//! session. Partial assistant messages additionally share a `stream_id` so a
//! client can coalesce them into one bubble.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One outbound event on a session channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique within the session, monotonically assigned (`m1`, `m2`, ...).
    pub message_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// The type-specific payload of an outbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// First event after a successful attach, before any replay.
    ConnectionEstablished,

    /// Loop reasoning milestone, short human text.
    Thinking { message: String },

    /// Assistant text, whole or streamed. Partials of one logical message
    /// share `stream_id`, carry `is_partial = true` and non-decreasing
    /// `progress`; the sequence ends with one non-partial event holding the
    /// full content.
    AiMessage {
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_partial: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },

    /// About to invoke a tool.
    ToolCall {
        tool: String,
        args: Value,
        step_id: String,
        description: String,
    },

    /// Outcome of a tool invocation.
    ToolResult {
        tool: String,
        step_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },

    /// Coarse progress of a single step.
    Progress {
        step_id: String,
        percent: f32,
        status: String,
    },

    /// State-machine milestone.
    WorkflowStatus { state: String, message: String },

    /// Plan-level completion fraction, emitted per finished step.
    WorkflowProgress {
        percent: f32,
        completed_steps: usize,
        total_steps: usize,
    },

    /// End of a workflow: human summary plus the artifact paths produced.
    WorkflowComplete { summary: String, artifacts: Value },

    /// Post-tool artifact hint for the UI.
    GuiUpdate {
        #[serde(flatten)]
        update: GuiUpdate,
    },

    /// Offered after a step fails terminally.
    AlternativeSuggestions {
        failed_tool: String,
        alternatives: Vec<String>,
    },

    /// Recoverable error surfaced to the client.
    Error { message: String },

    Pong,
    HeartbeatAck,
}

impl EventPayload {
    /// Convenience constructor for a whole (non-streamed) assistant message.
    pub fn ai_message(content: impl Into<String>) -> Self {
        EventPayload::AiMessage {
            content: content.into(),
            is_partial: false,
            progress: None,
            stream_id: None,
        }
    }

    pub fn thinking(message: impl Into<String>) -> Self {
        EventPayload::Thinking {
            message: message.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GUI updates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Artifact summaries derived from recognized tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "update_type", content = "data", rename_all = "snake_case")]
pub enum GuiUpdate {
    ScriptCreated { script_content: String },
    MediaDownloaded { media_files: Vec<String> },
    VoiceoverCreated { audio_path: String },
    VideoCreated {
        video_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Messages a client may send on the session channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A user turn, optionally carrying the frontend's state snapshot.
    UserMessage {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        frontend_state: Option<Value>,
    },
    Ping,
    Heartbeat,
    /// Auto-execute a previously offered action.
    Suggestion {
        suggestion_type: String,
        action: String,
    },
    /// Merge data into a session context bucket.
    ContextUpdate { context_type: String, data: Value },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_type_at_top_level() {
        let ev = Event {
            message_id: "m1".into(),
            session_id: "s1".into(),
            timestamp: Utc::now(),
            payload: EventPayload::ConnectionEstablished,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "connection_established");
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn whole_ai_message_omits_partial_fields() {
        let json = serde_json::to_value(EventPayload::ai_message("hello")).unwrap();
        assert_eq!(json["content"], "hello");
        assert!(json.get("is_partial").is_none());
        assert!(json.get("progress").is_none());
    }

    #[test]
    fn gui_update_shape() {
        let json = serde_json::to_value(EventPayload::GuiUpdate {
            update: GuiUpdate::MediaDownloaded {
                media_files: vec!["a.mp4".into()],
            },
        })
        .unwrap();
        assert_eq!(json["type"], "gui_update");
        assert_eq!(json["update_type"], "media_downloaded");
        assert_eq!(json["data"]["media_files"][0], "a.mp4");
    }

    #[test]
    fn inbound_round_trip() {
        let raw = r#"{"type":"user_message","content":"hi"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        match msg {
            InboundMessage::UserMessage {
                content,
                frontend_state,
            } => {
                assert_eq!(content, "hi");
                assert!(frontend_state.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }

        let raw = r#"{"type":"context_update","context_type":"preferences","data":{"k":1}}"#;
        assert!(matches!(
            serde_json::from_str::<InboundMessage>(raw).unwrap(),
            InboundMessage::ContextUpdate { .. }
        ));
    }
}
