//! The retrieval index: semantic search over session documents with a
//! fully-functional keyword mode.
//!
//! Two backends, chosen at construction. Vector mode embeds content through
//! an [`Embedder`] and ranks by cosine similarity; keyword mode scores by
//! the fraction of query terms present in the document. Keyword mode is not
//! degraded operation — it satisfies the same contract and is the default
//! build.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use cf_domain::Result;

use crate::document::{coerce_metadata, Document};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedder seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produces dense embedding vectors for document content and queries.
/// Implementations may call out to a model service.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier for logs and `stats()`.
    fn id(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    /// 1.0 = identical, 0.0 = unrelated.
    pub similarity: f32,
    /// Coarse bucket for prompt builders: "high" / "medium" / "low".
    pub relevance: &'static str,
}

fn relevance_bucket(similarity: f32) -> &'static str {
    if similarity >= 0.8 {
        "high"
    } else if similarity >= 0.6 {
        "medium"
    } else {
        "low"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RetrievalIndex
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Backend {
    Vector(Arc<dyn Embedder>),
    Keyword,
}

/// In-memory document store with pluggable ranking backend. Safe under
/// concurrent add and query.
pub struct RetrievalIndex {
    backend: Backend,
    docs: RwLock<HashMap<String, Document>>,
}

impl RetrievalIndex {
    /// Keyword-mode index (the default build).
    pub fn keyword() -> Self {
        Self {
            backend: Backend::Keyword,
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Vector-mode index backed by `embedder`.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            backend: Backend::Vector(embedder),
            docs: RwLock::new(HashMap::new()),
        }
    }

    /// Store a document. Non-primitive metadata values are stringified;
    /// vector mode computes the embedding eagerly.
    pub async fn add_document(
        &self,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        let content = content.into();
        let embedding = match &self.backend {
            Backend::Vector(embedder) => Some(embedder.embed(&content).await?),
            Backend::Keyword => None,
        };

        let doc = Document {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            metadata: coerce_metadata(metadata),
            embedding,
            timestamp: Utc::now(),
        };
        let id = doc.id.clone();
        self.docs.write().insert(id.clone(), doc);
        Ok(id)
    }

    /// Ranked search. Results below `threshold` are dropped; at most
    /// `top_k` are returned, best first.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = match &self.backend {
            Backend::Vector(embedder) => Some(embedder.embed(query).await?),
            Backend::Keyword => None,
        };

        let docs = self.docs.read();
        let mut results: Vec<SearchResult> = docs
            .values()
            .filter_map(|doc| {
                let similarity = match (&query_embedding, &doc.embedding) {
                    (Some(q), Some(d)) => cosine_similarity(q, d),
                    // Documents indexed before an embedder swap (or a
                    // keyword index) score by term overlap.
                    _ => keyword_score(query, &doc.content),
                };
                (similarity >= threshold).then(|| SearchResult {
                    document: doc.clone(),
                    similarity,
                    relevance: relevance_bucket(similarity),
                })
            })
            .collect();
        drop(docs);

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    /// Concatenate the best matches into a prompt fragment, truncated to a
    /// whitespace-token budget.
    pub async fn context_for_query(&self, query: &str, max_tokens: usize) -> Result<String> {
        let results = self.search(query, 5, 0.3).await?;
        if results.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::new();
        let mut used = 0usize;
        for result in results {
            let tokens = result.document.content.split_whitespace().count();
            if used + tokens > max_tokens {
                // Take the head of this document up to the remaining budget.
                let remaining = max_tokens.saturating_sub(used);
                if remaining > 0 {
                    let head: Vec<&str> = result
                        .document
                        .content
                        .split_whitespace()
                        .take(remaining)
                        .collect();
                    out.push_str(&head.join(" "));
                    out.push('\n');
                }
                break;
            }
            out.push_str(&result.document.content);
            out.push('\n');
            used += tokens;
        }
        Ok(out.trim_end().to_string())
    }

    // ── Convenience writers ────────────────────────────────────────

    /// Index recent conversation turns for a session.
    pub async fn add_conversation(
        &self,
        session_id: &str,
        turns: &[(String, String)],
    ) -> Result<()> {
        for (role, content) in turns {
            if content.trim().is_empty() {
                continue;
            }
            let mut meta = Map::new();
            meta.insert("kind".into(), Value::String("conversation".into()));
            meta.insert("session_id".into(), Value::String(session_id.into()));
            meta.insert("role".into(), Value::String(role.clone()));
            self.add_document(format!("{role}: {content}"), meta).await?;
        }
        Ok(())
    }

    pub async fn add_script(&self, session_id: &str, script: &str) -> Result<String> {
        let mut meta = Map::new();
        meta.insert("kind".into(), Value::String("script".into()));
        meta.insert("session_id".into(), Value::String(session_id.into()));
        self.add_document(script.to_string(), meta).await
    }

    /// Index one tool invocation; long outputs are truncated so a single
    /// result cannot crowd a prompt.
    pub async fn add_tool_result(
        &self,
        session_id: &str,
        tool_name: &str,
        input: &Value,
        output: &Value,
    ) -> Result<String> {
        const MAX_OUTPUT_CHARS: usize = 1000;

        let mut rendered = output.to_string();
        if rendered.len() > MAX_OUTPUT_CHARS {
            let mut end = MAX_OUTPUT_CHARS;
            while !rendered.is_char_boundary(end) {
                end -= 1;
            }
            rendered.truncate(end);
            rendered.push_str("...");
        }

        let content = format!("Tool: {tool_name}\nInput: {input}\nResult: {rendered}");
        let succeeded = output.get("error").is_none();
        let mut meta = Map::new();
        meta.insert("kind".into(), Value::String("tool_result".into()));
        meta.insert("session_id".into(), Value::String(session_id.into()));
        meta.insert("tool".into(), Value::String(tool_name.into()));
        meta.insert("success".into(), Value::Bool(succeeded));
        self.add_document(content, meta).await
    }

    /// Drop every document belonging to a session.
    pub fn clear_session(&self, session_id: &str) -> usize {
        let mut docs = self.docs.write();
        let before = docs.len();
        docs.retain(|_, doc| doc.session_id() != Some(session_id));
        before - docs.len()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            documents: self.docs.read().len(),
            backend: match &self.backend {
                Backend::Vector(e) => format!("vector:{}", e.id()),
                Backend::Keyword => "keyword".into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub documents: usize,
    pub backend: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fraction of distinct query terms present in `content`.
fn keyword_score(query: &str, content: &str) -> f32 {
    let content_lower = content.to_lowercase();
    let terms: Vec<String> = tokenize(query);
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms
        .iter()
        .filter(|t| content_lower.contains(t.as_str()))
        .count();
    matched as f32 / terms.len() as f32
}

fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(String::from)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(session_id: &str, kind: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("session_id".into(), json!(session_id));
        m.insert("kind".into(), json!(kind));
        m
    }

    #[tokio::test]
    async fn added_document_is_retrievable_by_its_content() {
        let index = RetrievalIndex::keyword();
        index
            .add_document("a cinematic script about the Romans", meta("s1", "script"))
            .await
            .unwrap();

        let results = index
            .search("cinematic script about the Romans", 10, 0.5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].similarity > 0.9);
        assert_eq!(results[0].relevance, "high");
    }

    #[tokio::test]
    async fn threshold_and_top_k_bound_results() {
        let index = RetrievalIndex::keyword();
        for i in 0..4 {
            index
                .add_document(format!("roman legion document {i}"), meta("s1", "script"))
                .await
                .unwrap();
        }
        index
            .add_document("unrelated weather report", meta("s1", "script"))
            .await
            .unwrap();

        let results = index.search("roman legion", 2, 0.5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.similarity >= 0.5));
    }

    #[tokio::test]
    async fn context_respects_token_budget() {
        let index = RetrievalIndex::keyword();
        index
            .add_document(
                "alpha beta gamma delta epsilon zeta eta theta",
                meta("s1", "script"),
            )
            .await
            .unwrap();

        let ctx = index.context_for_query("alpha beta gamma", 3).await.unwrap();
        assert_eq!(ctx.split_whitespace().count(), 3);
    }

    #[tokio::test]
    async fn clear_session_removes_only_that_session() {
        let index = RetrievalIndex::keyword();
        index
            .add_document("doc one", meta("s1", "script"))
            .await
            .unwrap();
        index
            .add_document("doc two", meta("s2", "script"))
            .await
            .unwrap();

        let removed = index.clear_session("s1");
        assert_eq!(removed, 1);
        assert_eq!(index.stats().documents, 1);
    }

    #[tokio::test]
    async fn tool_result_output_is_truncated() {
        let index = RetrievalIndex::keyword();
        let big = json!("x".repeat(5000));
        index
            .add_tool_result("s1", "script_writer", &json!({"topic": "t"}), &big)
            .await
            .unwrap();

        let results = index.search("script_writer topic", 1, 0.1).await.unwrap();
        assert!(results[0].document.content.len() < 1200);
        assert!(results[0].document.content.ends_with("..."));
    }

    struct HashEmbedder;

    #[async_trait::async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            // Toy bag-of-letters embedding, deterministic for tests.
            let mut v = vec![0.0f32; 26];
            for c in text.to_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    v[(c as usize) - ('a' as usize)] += 1.0;
                }
            }
            Ok(v)
        }
        fn id(&self) -> &str {
            "hash-test"
        }
    }

    #[tokio::test]
    async fn vector_backend_ranks_by_cosine() {
        let index = RetrievalIndex::with_embedder(Arc::new(HashEmbedder));
        index
            .add_document("aaaa bbbb", meta("s1", "script"))
            .await
            .unwrap();
        index
            .add_document("zzzz yyyy", meta("s1", "script"))
            .await
            .unwrap();

        let results = index.search("aaab", 2, 0.0).await.unwrap();
        assert_eq!(results[0].document.content, "aaaa bbbb");
        assert!(results[0].similarity > results[1].similarity);
    }
}
