/// Shared error type used across all clipforge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("input validation for '{tool}': {message}")]
    ValidationInput { tool: String, message: String },

    #[error("output validation for '{tool}': {message}")]
    ValidationOutput { tool: String, message: String },

    #[error("timeout after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("tool execution: {0}")]
    Execution(String),

    #[error("response parse: {0}")]
    Parse(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable kind string, used in `tool_result` payloads
    /// and tool-execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::ValidationInput { .. } => "validation_input",
            Error::ValidationOutput { .. } => "validation_output",
            Error::Timeout { .. } => "timeout",
            Error::NotFound(_) => "not_found",
            Error::RateLimited(_) => "rate_limited",
            Error::Unauthorized(_) => "unauthorized",
            Error::Execution(_) => "execution",
            Error::Parse(_) => "parse",
            Error::Transport(_) => "transport",
            Error::Config(_) => "config",
        }
    }

    /// Whether a retry without changes could plausibly succeed.
    /// Used by the LLM client's backoff loop; the agent loop has its own
    /// per-step retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_) | Error::Timeout { .. } | Error::Http(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            Error::ValidationInput {
                tool: "script_writer".into(),
                message: "missing topic".into()
            }
            .kind(),
            "validation_input"
        );
        assert_eq!(
            Error::Timeout {
                operation: "broll_finder".into(),
                seconds: 300
            }
            .kind(),
            "timeout"
        );
        assert_eq!(Error::NotFound("nope".into()).kind(), "not_found");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::RateLimited("429".into()).is_transient());
        assert!(Error::Http("connection reset".into()).is_transient());
        assert!(!Error::Unauthorized("401".into()).is_transient());
        assert!(!Error::Parse("bad json".into()).is_transient());
    }
}
