//! Stored documents and the metadata flattening applied before storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    /// Flat metadata: values are primitives after coercion.
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub timestamp: DateTime<Utc>,
}

impl Document {
    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get("session_id").and_then(|v| v.as_str())
    }

    pub fn kind(&self) -> Option<&str> {
        self.metadata.get("kind").and_then(|v| v.as_str())
    }
}

/// Coerce metadata values to primitives: arrays, objects, and anything else
/// non-primitive become their compact JSON string form.
pub fn coerce_metadata(metadata: Map<String, Value>) -> Map<String, Value> {
    metadata
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => v,
                other => Value::String(other.to_string()),
            };
            (k, v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coercion_stringifies_non_primitives() {
        let mut meta = Map::new();
        meta.insert("kind".into(), json!("tool_result"));
        meta.insert("count".into(), json!(3));
        meta.insert("files".into(), json!(["a.mp4", "b.mp4"]));
        meta.insert("nested".into(), json!({"x": 1}));

        let coerced = coerce_metadata(meta);
        assert_eq!(coerced["kind"], json!("tool_result"));
        assert_eq!(coerced["count"], json!(3));
        assert_eq!(coerced["files"], json!(r#"["a.mp4","b.mp4"]"#));
        assert_eq!(coerced["nested"], json!(r#"{"x":1}"#));
    }
}
