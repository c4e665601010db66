use cf_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single completion request: system preamble plus the user-facing
/// planner prompt.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    /// Model override. `None` = the transport's configured default.
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One round-trip to a planning model. Implementations map wire-level
/// failures to the shared error kinds: HTTP 429 → `rate_limited`,
/// 401 → `unauthorized`, 5xx/network → `http`, body-shape problems →
/// `parse`. Retry and fallback live above this seam in [`crate::LlmClient`].
#[async_trait::async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<String>;

    /// Identifier for logs.
    fn id(&self) -> &str;
}
