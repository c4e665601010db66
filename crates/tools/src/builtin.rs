//! Built-in reference tools for the video pipeline.
//!
//! These implement the wire contract end to end against the project
//! directory layout — scripts are synthesized deterministically, media and
//! rendered video are placeholder files — so workflows run without any
//! external service. A deployment swaps in real implementations behind the
//! same descriptors.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use cf_domain::error::{Error, Result};
use cf_domain::tool::{ParamSpec, ParamType, ToolSchema};
use cf_sessions::ProjectLayout;

use crate::registry::{Tool, ToolRegistry};

/// Register the four pipeline tools against `projects_root`.
pub fn register_builtin_tools(registry: &ToolRegistry, projects_root: PathBuf) {
    registry.register(Arc::new(ScriptWriterTool {
        projects_root: projects_root.clone(),
    }));
    registry.register(Arc::new(BrollFinderTool {
        projects_root: projects_root.clone(),
    }));
    registry.register(Arc::new(VoiceoverGeneratorTool {
        projects_root: projects_root.clone(),
    }));
    registry.register(Arc::new(VideoProcessorTool { projects_root }));
}

fn session_id(input: &Map<String, Value>) -> &str {
    input
        .get("session_id")
        .and_then(|v| v.as_str())
        .unwrap_or("anonymous")
}

fn layout_for(projects_root: &PathBuf, input: &Map<String, Value>) -> Result<ProjectLayout> {
    ProjectLayout::open_or_init(projects_root, session_id(input))
}

fn str_arg(input: &Map<String, Value>, key: &str, default: &str) -> String {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
        .to_string()
}

/// File-name-safe slug of a topic.
fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let trimmed = slug.trim_matches('_');
    if trimmed.is_empty() {
        "untitled".into()
    } else {
        trimmed.chars().take(40).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// script_writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ScriptWriterTool {
    projects_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for ScriptWriterTool {
    fn name(&self) -> &str {
        "script_writer"
    }

    fn description(&self) -> &str {
        "Write a narration script for a video on a given topic"
    }

    fn input_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert(
            "topic".into(),
            ParamSpec::required(ParamType::String).describe("Subject of the script"),
        );
        s.insert(
            "style".into(),
            ParamSpec::optional(ParamType::String, json!("cinematic")),
        );
        s.insert(
            "length".into(),
            ParamSpec::optional(ParamType::String, json!("60 seconds"))
                .describe("Target spoken length"),
        );
        Some(s)
    }

    fn output_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert(
            "script_text".into(),
            ParamSpec::required(ParamType::String),
        );
        s.insert("word_count".into(), ParamSpec::required(ParamType::Integer));
        s.insert("script_path".into(), ParamSpec::required(ParamType::String));
        Some(s)
    }

    fn category(&self) -> &str {
        "content"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["script".into(), "writing".into()]
    }

    fn examples(&self) -> Vec<String> {
        vec![r#"{"topic": "The Romans", "style": "cinematic", "length": "60 seconds"}"#.into()]
    }

    async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>> {
        let topic = str_arg(&input, "topic", "");
        let style = str_arg(&input, "style", "cinematic");
        let length = str_arg(&input, "length", "60 seconds");

        let script_text = compose_script(&topic, &style, &length);
        let word_count = script_text.split_whitespace().count();

        let layout = layout_for(&self.projects_root, &input)?;
        let script_path = layout.scripts_dir().join("script.txt");
        std::fs::write(&script_path, &script_text)?;
        layout.touch()?;

        let mut out = Map::new();
        out.insert("script_text".into(), json!(script_text));
        out.insert("word_count".into(), json!(word_count));
        out.insert("script_path".into(), json!(script_path.to_string_lossy()));
        out.insert("style".into(), json!(style));
        Ok(out)
    }
}

/// Deterministic narration text: an opening hook, body beats, and a closing
/// line, scaled roughly to the requested length.
fn compose_script(topic: &str, style: &str, length: &str) -> String {
    let beats: usize = if length.contains("30") {
        2
    } else if length.contains("90") || length.contains("120") {
        6
    } else {
        4
    };

    let mut lines = vec![format!(
        "{topic}. Few subjects reward a closer look the way this one does."
    )];
    let angles = [
        "origins and the forces that shaped them",
        "the moments everything changed",
        "what the evidence actually shows",
        "the people at the center of the story",
        "how it echoes in the present day",
        "the questions still left open",
    ];
    for angle in angles.iter().take(beats) {
        lines.push(format!(
            "Consider {angle}: every frame of this {style} piece builds on it."
        ));
    }
    lines.push(format!(
        "{topic} is a story worth telling well. This is that telling."
    ));
    lines.join(" ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// broll_finder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BrollFinderTool {
    projects_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for BrollFinderTool {
    fn name(&self) -> &str {
        "broll_finder"
    }

    fn description(&self) -> &str {
        "Search for and download B-roll media clips matching a topic"
    }

    fn input_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert("topic".into(), ParamSpec::required(ParamType::String));
        s.insert(
            "count".into(),
            ParamSpec::optional(ParamType::Integer, json!(8)).describe("Clips to download"),
        );
        s.insert(
            "style".into(),
            ParamSpec::optional(ParamType::String, json!("cinematic")),
        );
        Some(s)
    }

    fn output_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert(
            "downloaded_files".into(),
            ParamSpec::required(ParamType::Array),
        );
        s.insert("count".into(), ParamSpec::required(ParamType::Integer));
        Some(s)
    }

    fn category(&self) -> &str {
        "media"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["broll".into(), "search".into(), "download".into()]
    }

    fn examples(&self) -> Vec<String> {
        vec![r#"{"topic": "Lionel Messi", "count": 8}"#.into()]
    }

    async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>> {
        let topic = str_arg(&input, "topic", "");
        let count = input
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(8)
            .clamp(1, 32) as usize;

        let layout = layout_for(&self.projects_root, &input)?;
        let slug = slugify(&topic);
        let mut downloaded = Vec::with_capacity(count);
        for i in 1..=count {
            let path = layout.broll_dir().join(format!("{slug}_{i:02}.mp4"));
            if !path.exists() {
                std::fs::write(&path, placeholder_mp4())?;
            }
            downloaded.push(json!(path.to_string_lossy()));
        }
        layout.touch()?;

        let mut out = Map::new();
        out.insert("downloaded_files".into(), Value::Array(downloaded));
        out.insert("count".into(), json!(count));
        Ok(out)
    }
}

/// A few bytes with an MP4 ftyp box so downstream probes see a plausible
/// container.
fn placeholder_mp4() -> &'static [u8] {
    &[
        0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02,
        0x00, b'i', b's', b'o', b'm', b'm', b'p', b'4', b'1',
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// voiceover_generator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VoiceoverGeneratorTool {
    projects_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for VoiceoverGeneratorTool {
    fn name(&self) -> &str {
        "voiceover_generator"
    }

    fn description(&self) -> &str {
        "Generate a spoken voiceover track from a script"
    }

    fn input_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert(
            "script_text".into(),
            ParamSpec::optional(ParamType::String, json!(""))
                .describe("Narration text; falls back to the project script"),
        );
        s.insert(
            "voice".into(),
            ParamSpec::optional(ParamType::String, json!("professional")),
        );
        Some(s)
    }

    fn output_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert("audio_path".into(), ParamSpec::required(ParamType::String));
        s.insert(
            "duration_secs".into(),
            ParamSpec::required(ParamType::Float),
        );
        Some(s)
    }

    fn category(&self) -> &str {
        "audio"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["voiceover".into(), "tts".into()]
    }

    async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>> {
        let layout = layout_for(&self.projects_root, &input)?;

        let mut script = str_arg(&input, "script_text", "");
        if script.trim().is_empty() {
            script = layout.read_script().ok_or_else(|| {
                Error::Execution(
                    "no script_text supplied and the project has no script yet".into(),
                )
            })?;
        }
        let voice = str_arg(&input, "voice", "professional");

        // ~2.5 words per second of narration.
        let words = script.split_whitespace().count();
        let duration_secs = (words as f64 / 2.5).max(1.0);

        let audio_path = layout.voiceovers_dir().join("voiceover.wav");
        std::fs::write(&audio_path, placeholder_wav())?;
        layout.touch()?;

        let mut out = Map::new();
        out.insert("audio_path".into(), json!(audio_path.to_string_lossy()));
        out.insert("duration_secs".into(), json!(duration_secs));
        out.insert("voice".into(), json!(voice));
        out.insert("script_used".into(), json!(script));
        Ok(out)
    }
}

/// Minimal RIFF/WAVE header followed by a short silent payload.
fn placeholder_wav() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&36u32.to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&16_000u32.to_le_bytes());
    bytes.extend_from_slice(&32_000u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// video_processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VideoProcessorTool {
    projects_root: PathBuf,
}

#[async_trait::async_trait]
impl Tool for VideoProcessorTool {
    fn name(&self) -> &str {
        "video_processor"
    }

    fn description(&self) -> &str {
        "Assemble downloaded media and the voiceover into a final video"
    }

    fn input_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert(
            "style".into(),
            ParamSpec::optional(ParamType::String, json!("cinematic")),
        );
        s.insert(
            "duration".into(),
            ParamSpec::optional(ParamType::String, json!("60 seconds")),
        );
        Some(s)
    }

    fn output_schema(&self) -> Option<ToolSchema> {
        let mut s = ToolSchema::new();
        s.insert("video_path".into(), ParamSpec::required(ParamType::String));
        s.insert("components".into(), ParamSpec::required(ParamType::Array));
        Some(s)
    }

    fn category(&self) -> &str {
        "video"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["assembly".into(), "render".into()]
    }

    async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>> {
        let layout = layout_for(&self.projects_root, &input)?;

        let mut components = Vec::new();
        if layout.read_script().is_some() {
            components.push(json!("script"));
        }
        let media = layout.media_inventory()?;
        let clips = media
            .iter()
            .filter(|m| m.kind == cf_sessions::MediaKind::Video)
            .count();
        if clips > 0 {
            components.push(json!("media"));
        }
        if media
            .iter()
            .any(|m| m.kind == cf_sessions::MediaKind::Audio)
        {
            components.push(json!("voiceover"));
        }

        let video_path = layout.exports_dir().join("final_video.mp4");
        std::fs::write(&video_path, placeholder_mp4())?;
        let thumbnail = layout.exports_dir().join("thumbnail.jpg");
        std::fs::write(&thumbnail, b"\xFF\xD8\xFF\xDB")?;
        layout.touch()?;

        let mut out = Map::new();
        out.insert("video_path".into(), json!(video_path.to_string_lossy()));
        out.insert("thumbnail".into(), json!(thumbnail.to_string_lossy()));
        out.insert("components".into(), Value::Array(components));
        out.insert("clip_count".into(), json!(clips));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(session: &str, pairs: &[(&str, Value)]) -> Map<String, Value> {
        let mut m: Map<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        m.insert("session_id".into(), json!(session));
        m
    }

    #[tokio::test]
    async fn script_writer_produces_text_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = ScriptWriterTool {
            projects_root: tmp.path().to_path_buf(),
        };
        let out = tool
            .run(input(
                "s1",
                &[
                    ("topic", json!("The Romans")),
                    ("style", json!("cinematic")),
                    ("length", json!("60 seconds")),
                ],
            ))
            .await
            .unwrap();

        let text = out["script_text"].as_str().unwrap();
        assert!(text.contains("The Romans"));
        assert!(out["word_count"].as_u64().unwrap() > 20);
        let path = PathBuf::from(out["script_path"].as_str().unwrap());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn broll_finder_downloads_requested_count() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = BrollFinderTool {
            projects_root: tmp.path().to_path_buf(),
        };
        let out = tool
            .run(input(
                "s1",
                &[("topic", json!("Messi")), ("count", json!(3))],
            ))
            .await
            .unwrap();

        let files = out["downloaded_files"].as_array().unwrap();
        assert_eq!(files.len(), 3);
        for f in files {
            assert!(PathBuf::from(f.as_str().unwrap()).exists());
        }
    }

    #[tokio::test]
    async fn voiceover_falls_back_to_project_script() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::open_or_init(tmp.path(), "s1").unwrap();
        std::fs::write(
            layout.scripts_dir().join("script.txt"),
            "ten words of narration text to time the voiceover with",
        )
        .unwrap();

        let tool = VoiceoverGeneratorTool {
            projects_root: tmp.path().to_path_buf(),
        };
        let out = tool.run(input("s1", &[])).await.unwrap();
        assert!(PathBuf::from(out["audio_path"].as_str().unwrap()).exists());
        assert!((out["duration_secs"].as_f64().unwrap() - 4.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn voiceover_without_any_script_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = VoiceoverGeneratorTool {
            projects_root: tmp.path().to_path_buf(),
        };
        let err = tool.run(input("s1", &[])).await.unwrap_err();
        assert_eq!(err.kind(), "execution");
    }

    #[tokio::test]
    async fn video_processor_reports_present_components() {
        let tmp = tempfile::tempdir().unwrap();

        // Seed a full project.
        let script = ScriptWriterTool {
            projects_root: tmp.path().to_path_buf(),
        };
        script
            .run(input("s1", &[("topic", json!("Space"))]))
            .await
            .unwrap();
        let broll = BrollFinderTool {
            projects_root: tmp.path().to_path_buf(),
        };
        broll
            .run(input("s1", &[("topic", json!("Space")), ("count", json!(2))]))
            .await
            .unwrap();
        let vo = VoiceoverGeneratorTool {
            projects_root: tmp.path().to_path_buf(),
        };
        vo.run(input("s1", &[])).await.unwrap();

        let tool = VideoProcessorTool {
            projects_root: tmp.path().to_path_buf(),
        };
        let out = tool.run(input("s1", &[])).await.unwrap();
        assert!(PathBuf::from(out["video_path"].as_str().unwrap()).exists());
        let components = out["components"].as_array().unwrap();
        assert_eq!(components.len(), 3);
        assert_eq!(out["clip_count"], json!(2));
    }

    #[test]
    fn slugify_is_filename_safe() {
        assert_eq!(slugify("The Romans!"), "the_romans");
        assert_eq!(slugify("   "), "untitled");
    }
}
