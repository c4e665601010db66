//! Deterministic rule-based planner responses.
//!
//! When no model is reachable (missing credentials, auth failure, retry
//! exhaustion) the client synthesizes a response from a small set of intent
//! cues. The output is a JSON string in the same canonical shapes a real
//! model is asked for, so the rest of the pipeline cannot tell the
//! difference.

use serde_json::json;

const SCRIPT_CUES: &[&str] = &["script", "write"];
const MEDIA_CUES: &[&str] = &["broll", "b-roll", "media", "footage", "images"];
const VOICE_CUES: &[&str] = &["voiceover", "audio", "speech", "narration"];
const CREATE_CUES: &[&str] = &["video", "create", "make", "generate", "produce"];
const GREETING_CUES: &[&str] = &["hi", "hello", "hey", "greetings"];
const QUESTION_CUES: &[&str] = &["who", "what", "how", "why", "when", "where"];
const HELP_CUES: &[&str] = &["help", "capabilities"];

/// Synthesize a canonical planner response for `prompt`.
pub fn fallback_response(prompt: &str) -> String {
    let words = word_set(prompt);
    let has = |cues: &[&str]| cues.iter().any(|c| words.contains(&c.to_string()));

    let wants_tools =
        has(CREATE_CUES) || has(SCRIPT_CUES) || has(MEDIA_CUES) || has(VOICE_CUES);

    if wants_tools {
        let topic = extract_topic(prompt);
        let tool_calls = if has(SCRIPT_CUES) {
            vec![script_call(&topic)]
        } else if has(MEDIA_CUES) {
            vec![broll_call(&topic)]
        } else if has(VOICE_CUES) {
            vec![voiceover_call(&topic)]
        } else {
            // Full video workflow: script, media, voiceover, assembly.
            vec![
                script_call(&topic),
                broll_call(&topic),
                voiceover_call(&topic),
                video_call(&topic),
            ]
        };

        return json!({
            "response_type": "workflow",
            "reasoning": format!(
                "Request asks for content about {topic}; running the matching tool workflow."
            ),
            "tool_calls": tool_calls,
            "user_message": format!(
                "I'll get started on {topic}! Let me line up the right tools."
            ),
        })
        .to_string();
    }

    if has(GREETING_CUES) {
        return json!({
            "response_type": "conversational",
            "reasoning": "Greeting detected.",
            "user_message": "Hello! I'm your video-creation assistant. I can write scripts, \
                find B-roll footage, generate voiceovers, and assemble finished videos. \
                What would you like to work on?",
        })
        .to_string();
    }

    if has(HELP_CUES) {
        return json!({
            "response_type": "informational",
            "reasoning": "Capability question detected.",
            "user_message": "Here's what I can do: write scripts on any topic, search and \
                download B-roll media, generate voiceovers from a script, and assemble \
                everything into a final video. Just describe what you want to create.",
            "suggestions": [
                "Write a script about any topic",
                "Find B-roll media for a project",
                "Create a complete video"
            ],
        })
        .to_string();
    }

    if has(QUESTION_CUES) && prompt.contains('?') {
        return json!({
            "response_type": "conversational",
            "reasoning": "General question detected.",
            "user_message": format!(
                "Good question! I'm focused on video creation, so I can't research that \
                 directly, but I'd be happy to make a video or script about it. \
                 You asked: {prompt}"
            ),
        })
        .to_string();
    }

    json!({
        "response_type": "conversational",
        "reasoning": "No actionable intent detected.",
        "user_message": "I can help you create videos: scripts, B-roll, voiceovers, or the \
            whole thing end to end. What would you like to make?",
    })
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool call templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn script_call(topic: &str) -> serde_json::Value {
    json!({
        "tool": "script_writer",
        "args": { "topic": topic, "style": "cinematic", "length": "60 seconds" },
        "description": format!("Creating a script about {topic}"),
    })
}

fn broll_call(topic: &str) -> serde_json::Value {
    json!({
        "tool": "broll_finder",
        "args": { "topic": topic, "count": 8, "style": "cinematic" },
        "description": format!("Finding B-roll media for {topic}"),
    })
}

fn voiceover_call(topic: &str) -> serde_json::Value {
    json!({
        "tool": "voiceover_generator",
        "args": { "voice": "professional" },
        "description": format!("Generating a voiceover for {topic}"),
    })
}

fn video_call(topic: &str) -> serde_json::Value {
    json!({
        "tool": "video_processor",
        "args": { "style": "cinematic", "duration": "60 seconds" },
        "description": format!("Assembling the final video about {topic}"),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Topic extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull a human-readable topic out of a prompt: "about X" / "on X" phrases
/// first, then the noun phrase before "video", then a plain default.
pub fn extract_topic(prompt: &str) -> String {
    let lower = prompt.to_lowercase();

    for marker in ["about ", " on "] {
        if let Some(pos) = lower.find(marker) {
            let start = pos + marker.len();
            let rest = &prompt[start..];
            let end = rest
                .find(['.', '!', '?', ',', '\n'])
                .unwrap_or(rest.len());
            let topic = rest[..end].trim();
            if !topic.is_empty() {
                return capitalize_first(topic);
            }
        }
    }

    if let Some(pos) = lower.find(" video") {
        // "a Mars rover video" → "a Mars rover" → drop leading articles.
        let head = prompt[..pos].trim();
        let head = head
            .trim_start_matches("make me a ")
            .trim_start_matches("create a ")
            .trim_start_matches("a ")
            .trim();
        if !head.is_empty() {
            return capitalize_first(head);
        }
    }

    "your topic".into()
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn word_set(prompt: &str) -> Vec<String> {
    prompt
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}
