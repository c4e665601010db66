//! Deterministic per-tool verification predicates.
//!
//! A step only counts as done when its result has the right shape: a
//! script tool must yield text, a media tool must yield files that exist on
//! disk, and so on. Tools without a registered predicate pass when they
//! returned any payload beyond the executor's augmentation fields.

use serde_json::{Map, Value};

/// Fields added by the executor, ignored when judging "non-empty output".
const AUGMENTATION_FIELDS: [&str; 4] = ["execution_time", "tool_name", "tool_version", "session_id"];

/// Shape-check `output` for `tool`.
pub fn verify_result(tool: &str, output: &Map<String, Value>) -> bool {
    match tool {
        "script_writer" => output
            .get("script_text")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty()),

        "broll_finder" => output
            .get("downloaded_files")
            .and_then(|v| v.as_array())
            .is_some_and(|files| {
                files.iter().any(|f| {
                    f.as_str()
                        .map(|path| std::path::Path::new(path).exists())
                        .unwrap_or(false)
                })
            }),

        "voiceover_generator" => output
            .get("audio_path")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.is_empty()),

        "video_processor" => output
            .get("video_path")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.is_empty()),

        _ => output
            .keys()
            .any(|k| !AUGMENTATION_FIELDS.contains(&k.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn script_requires_non_empty_text() {
        assert!(verify_result(
            "script_writer",
            &obj(json!({"script_text": "A story."}))
        ));
        assert!(!verify_result("script_writer", &obj(json!({"script_text": "  "}))));
        assert!(!verify_result("script_writer", &obj(json!({}))));
    }

    #[test]
    fn broll_requires_an_existing_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let real = tmp.path().to_string_lossy().to_string();

        assert!(verify_result(
            "broll_finder",
            &obj(json!({"downloaded_files": [real]}))
        ));
        assert!(!verify_result(
            "broll_finder",
            &obj(json!({"downloaded_files": ["/definitely/not/here.mp4"]}))
        ));
        assert!(!verify_result(
            "broll_finder",
            &obj(json!({"downloaded_files": []}))
        ));
    }

    #[test]
    fn voiceover_and_video_require_paths() {
        assert!(verify_result(
            "voiceover_generator",
            &obj(json!({"audio_path": "/tmp/vo.wav"}))
        ));
        assert!(!verify_result("voiceover_generator", &obj(json!({}))));
        assert!(verify_result(
            "video_processor",
            &obj(json!({"video_path": "/tmp/final.mp4"}))
        ));
        assert!(!verify_result("video_processor", &obj(json!({"other": 1}))));
    }

    #[test]
    fn unknown_tool_passes_on_any_real_output() {
        assert!(verify_result("custom_tool", &obj(json!({"anything": 1}))));
        // Augmentation-only output does not count.
        assert!(!verify_result(
            "custom_tool",
            &obj(json!({
                "execution_time": 0.1,
                "tool_name": "custom_tool",
                "tool_version": "1.0.0"
            }))
        ));
    }
}
