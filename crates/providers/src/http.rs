//! OpenAI-compatible HTTP transport.
//!
//! Works with any endpoint that follows the OpenAI chat completions
//! contract; which vendor sits behind the URL is a deployment detail.

use serde_json::Value;

use cf_domain::config::LlmConfig;
use cf_domain::error::{Error, Result};

use crate::traits::{CompletionRequest, LlmTransport};

/// Env var consulted when the config carries no API key.
pub const API_KEY_ENV: &str = "CLIPFORGE_LLM_API_KEY";

pub struct HttpTransport {
    base_url: String,
    api_key: String,
    default_model: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport from config. Returns `None` when no API key is
    /// available anywhere — the caller then runs fallback-only.
    pub fn from_config(cfg: &LlmConfig) -> Result<Option<Self>> {
        let api_key = match cfg
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
        {
            Some(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Some(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            timeout_secs: cfg.timeout_secs,
            client,
        }))
    }
}

#[async_trait::async_trait]
impl LlmTransport for HttpTransport {
    async fn complete(&self, req: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        let body = serde_json::json!({
            "model": model,
            "messages": [
                { "role": "system", "content": req.system },
                { "role": "user", "content": req.prompt },
            ],
            "temperature": req.temperature.unwrap_or(0.7),
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: "llm completion".into(),
                        seconds: self.timeout_secs,
                    }
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = format!("{status}: {}", truncate(&text, 200));
            return Err(match status.as_u16() {
                401 | 403 => Error::Unauthorized(detail),
                429 => Error::RateLimited(detail),
                _ => Error::Http(detail),
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::Parse("completion response carried no message content".into()))
    }

    fn id(&self) -> &str {
        "openai-compat"
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
