//! The single call surface for planner queries.
//!
//! Wraps an optional transport with retry/backoff and the rule-based
//! fallback. Callers always get a response string back; the agent loop is
//! never told whether the model was reachable.

use std::sync::Arc;

use parking_lot::RwLock;

use cf_domain::config::LlmConfig;
use cf_domain::error::Error;

use crate::fallback::fallback_response;
use crate::traits::{CompletionRequest, LlmTransport};

/// Role preamble prepended to every request, ahead of the tool catalog.
const SYSTEM_PREAMBLE: &str = "\
You are a video-creation agent. You plan and run tool workflows that write \
scripts, find B-roll media, generate voiceovers, and assemble videos, and \
you converse naturally when no tools are needed.

Reply with a single JSON object discriminated by \"response_type\": one of \
\"conversational\", \"informational\", \"workflow\", \"interactive\", or \
\"adaptive\". A workflow reply carries an ordered \"tool_calls\" list of \
{tool, args, description} objects. Always include a \"user_message\".";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Retrying client over an optional [`LlmTransport`].
///
/// `None` transport means fallback-only operation (no credentials
/// configured), which is a fully supported mode rather than an error state.
pub struct LlmClient {
    transport: Option<Arc<dyn LlmTransport>>,
    /// Formatted descriptions of the registered tools, set once the
    /// registry is populated at startup.
    tool_catalog: RwLock<String>,
    max_attempts: u32,
    backoff_base_secs: u64,
}

impl LlmClient {
    pub fn new(transport: Option<Arc<dyn LlmTransport>>, cfg: &LlmConfig) -> Self {
        if transport.is_none() {
            tracing::warn!("no LLM transport configured; running on rule-based fallback");
        }
        Self {
            transport,
            tool_catalog: RwLock::new(String::new()),
            max_attempts: cfg.max_attempts.max(1),
            backoff_base_secs: cfg.backoff_base_secs,
        }
    }

    /// Fallback-only client (tests, offline development).
    pub fn fallback_only() -> Self {
        Self {
            transport: None,
            tool_catalog: RwLock::new(String::new()),
            max_attempts: 1,
            backoff_base_secs: 0,
        }
    }

    /// Install the formatted tool catalog included in every system prompt.
    pub fn set_tool_catalog(&self, catalog: String) {
        *self.tool_catalog.write() = catalog;
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Ask the planning model. Retries rate-limit and transient failures
    /// with exponential backoff; auth failures and retry exhaustion fall
    /// back to the deterministic generator, so this never fails.
    pub async fn generate(&self, prompt: &str) -> String {
        self.generate_seeded(prompt, prompt).await
    }

    /// Like [`Self::generate`], but the fallback generator classifies
    /// `fallback_seed` instead of the full prompt. Planner callers pass the
    /// raw user message here so intent cues are not triggered by prompt
    /// scaffolding.
    pub async fn generate_seeded(&self, prompt: &str, fallback_seed: &str) -> String {
        let Some(transport) = &self.transport else {
            return fallback_response(fallback_seed);
        };

        let req = CompletionRequest {
            system: self.system_prompt(),
            prompt: prompt.to_string(),
            model: None,
            temperature: None,
        };

        for attempt in 1..=self.max_attempts {
            match transport.complete(&req).await {
                Ok(text) => return text,
                Err(Error::Unauthorized(detail)) => {
                    tracing::error!(%detail, "LLM auth failed; using fallback response");
                    return fallback_response(fallback_seed);
                }
                Err(Error::Parse(detail)) => {
                    // A malformed body will not improve on retry.
                    tracing::error!(%detail, "unparseable LLM response; using fallback");
                    return fallback_response(fallback_seed);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let wait = self.backoff_base_secs * 2u64.pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_secs = wait,
                        error = %e,
                        "LLM request failed; backing off"
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                }
                Err(e) => {
                    tracing::error!(
                        attempt,
                        error = %e,
                        "LLM request failed terminally; using fallback response"
                    );
                    return fallback_response(fallback_seed);
                }
            }
        }

        fallback_response(fallback_seed)
    }

    fn system_prompt(&self) -> String {
        let catalog = self.tool_catalog.read();
        if catalog.is_empty() {
            SYSTEM_PREAMBLE.to_string()
        } else {
            format!("{SYSTEM_PREAMBLE}\n\nAvailable tools:\n{catalog}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cf_domain::Result;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        calls: AtomicU32,
        fail_first: u32,
        error: fn() -> Error,
    }

    #[async_trait::async_trait]
    impl LlmTransport for FlakyTransport {
        async fn complete(&self, _req: &CompletionRequest) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err((self.error)())
            } else {
                Ok(r#"{"response_type":"conversational","user_message":"ok"}"#.into())
            }
        }
        fn id(&self) -> &str {
            "flaky-test"
        }
    }

    fn client_with(transport: FlakyTransport) -> (LlmClient, Arc<FlakyTransport>) {
        let transport = Arc::new(transport);
        let cfg = LlmConfig {
            backoff_base_secs: 0,
            ..Default::default()
        };
        (LlmClient::new(Some(transport.clone()), &cfg), transport)
    }

    #[tokio::test]
    async fn no_transport_means_fallback() {
        let client = LlmClient::fallback_only();
        let out = client.generate("hi").await;
        assert!(out.contains("conversational"));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let (client, transport) = client_with(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 2,
            error: || Error::RateLimited("429".into()),
        });
        let out = client.generate("hello there").await;
        assert!(out.contains("\"user_message\":\"ok\""));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let (client, transport) = client_with(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error: || Error::Unauthorized("401".into()),
        });
        let out = client.generate("make me a video on Messi").await;
        // One attempt, then the deterministic workflow fallback.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert!(out.contains("\"response_type\":\"workflow\""));
    }

    #[tokio::test]
    async fn exhaustion_falls_back() {
        let (client, transport) = client_with(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 10,
            error: || Error::Http("503 service unavailable".into()),
        });
        let out = client.generate("hi").await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(out.contains("conversational"));
    }

    #[test]
    fn system_prompt_includes_catalog() {
        let client = LlmClient::fallback_only();
        client.set_tool_catalog("- script_writer: writes scripts".into());
        assert!(client.system_prompt().contains("script_writer"));
    }
}
