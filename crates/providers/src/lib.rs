//! LLM access for the planner: a provider-agnostic transport seam, an
//! OpenAI-compatible HTTP adapter, a retrying client, and the rule-based
//! fallback generator that keeps the agent loop operational without a
//! reachable model.

pub mod client;
pub mod fallback;
pub mod http;
pub mod traits;

pub use client::LlmClient;
pub use http::HttpTransport;
pub use traits::{CompletionRequest, LlmTransport};
