//! Timeout-bounded, schema-validated tool invocation.
//!
//! The executor owns no retry policy — the agent loop decides retry vs
//! advance. Every invocation, success or failure, is appended to the
//! session's tool-execution log and indexed into the retrieval store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use cf_domain::error::{Error, Result};
use cf_domain::tool::ToolExecution;
use cf_retrieval::RetrievalIndex;
use cf_sessions::SessionStore;

use crate::registry::ToolRegistry;
use crate::schema::{validate_input, validate_output};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    retrieval: Arc<RetrievalIndex>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        retrieval: Arc<RetrievalIndex>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            retrieval,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Invoke `tool_name` with `input`. The context map must carry
    /// `session_id`; it is injected into the tool input when the caller
    /// did not supply one. On timeout the in-flight invocation is
    /// cancelled (its future is dropped).
    pub async fn execute(
        &self,
        tool_name: &str,
        input: Map<String, Value>,
        context: &Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Map<String, Value>> {
        let session_id = context
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or("anonymous")
            .to_string();

        let started = std::time::Instant::now();
        let result = self
            .execute_inner(tool_name, input.clone(), &session_id, timeout)
            .await;
        let duration_secs = started.elapsed().as_secs_f64();

        // Record the invocation regardless of outcome.
        let input_snapshot = Value::Object(input);
        let record = match &result {
            Ok(output) => ToolExecution {
                tool_name: tool_name.to_string(),
                input: input_snapshot.clone(),
                output: Some(Value::Object(output.clone())),
                error: None,
                error_kind: None,
                duration_secs,
                timestamp: Utc::now(),
            },
            Err(e) => ToolExecution {
                tool_name: tool_name.to_string(),
                input: input_snapshot.clone(),
                output: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
                duration_secs,
                timestamp: Utc::now(),
            },
        };
        self.sessions.record_execution(&session_id, record);

        let indexed_output = match &result {
            Ok(output) => Value::Object(output.clone()),
            Err(e) => serde_json::json!({ "error": e.to_string(), "kind": e.kind() }),
        };
        if let Err(e) = self
            .retrieval
            .add_tool_result(&session_id, tool_name, &input_snapshot, &indexed_output)
            .await
        {
            tracing::warn!(tool = tool_name, error = %e, "failed to index tool result");
        }

        result
    }

    async fn execute_inner(
        &self,
        tool_name: &str,
        input: Map<String, Value>,
        session_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Map<String, Value>> {
        let registered = self
            .registry
            .get(tool_name)
            .ok_or_else(|| Error::NotFound(format!("tool '{tool_name}'")))?;

        let mut validated = validate_input(tool_name, &registered.descriptor.input_schema, input)?;
        validated
            .entry("session_id".to_string())
            .or_insert_with(|| Value::String(session_id.to_string()));

        let budget = timeout.unwrap_or(self.default_timeout);
        let run_started = std::time::Instant::now();
        let run = registered.handler.run(validated);
        let mut output = match tokio::time::timeout(budget, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                // Normalize tool-raised failures that are not already typed.
                return Err(match e {
                    e @ (Error::ValidationInput { .. }
                    | Error::ValidationOutput { .. }
                    | Error::RateLimited(_)
                    | Error::Timeout { .. }
                    | Error::NotFound(_)) => e,
                    other => Error::Execution(other.to_string()),
                });
            }
            Err(_) => {
                return Err(Error::Timeout {
                    operation: format!("tool '{tool_name}'"),
                    seconds: budget.as_secs(),
                });
            }
        };

        validate_output(tool_name, &registered.descriptor.output_schema, &output)?;

        // Augment with execution metadata.
        output.insert(
            "execution_time".into(),
            serde_json::json!(run_started.elapsed().as_secs_f64()),
        );
        output.insert("tool_name".into(), Value::String(tool_name.to_string()));
        output.insert(
            "tool_version".into(),
            Value::String(registered.descriptor.version.clone()),
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Tool;
    use cf_domain::tool::{ParamSpec, ParamType, ToolSchema};
    use serde_json::json;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn input_schema(&self) -> Option<ToolSchema> {
            let mut s = ToolSchema::new();
            s.insert("text".into(), ParamSpec::required(ParamType::String));
            Some(s)
        }
        async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>> {
            Ok(input)
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(input)
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always raises"
        }
        async fn run(&self, _input: Map<String, Value>) -> Result<Map<String, Value>> {
            Err(Error::Execution("boom".into()))
        }
    }

    fn executor() -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(FailingTool));
        ToolExecutor::new(
            registry,
            Arc::new(SessionStore::new(50)),
            Arc::new(RetrievalIndex::keyword()),
            Duration::from_secs(300),
        )
    }

    fn ctx(session_id: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("session_id".into(), json!(session_id));
        m
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn success_augments_output_and_records_execution() {
        let executor = executor();
        let out = executor
            .execute("echo", obj(json!({"text": "hi"})), &ctx("s1"), None)
            .await
            .unwrap();

        assert_eq!(out["text"], json!("hi"));
        assert_eq!(out["tool_name"], json!("echo"));
        assert_eq!(out["tool_version"], json!("1.0.0"));
        assert!(out["execution_time"].as_f64().is_some());
        // session_id injected from context.
        assert_eq!(out["session_id"], json!("s1"));

        let snap = executor.sessions.snapshot("s1").unwrap();
        assert_eq!(snap.tool_executions.len(), 1);
        assert!(snap.tool_executions[0].succeeded());
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found_and_still_recorded() {
        let executor = executor();
        let err = executor
            .execute("ghost", Map::new(), &ctx("s1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let snap = executor.sessions.snapshot("s1").unwrap();
        assert_eq!(
            snap.tool_executions[0].error_kind.as_deref(),
            Some("not_found")
        );
    }

    #[tokio::test]
    async fn invalid_input_is_typed_and_recorded() {
        let executor = executor();
        let err = executor
            .execute("echo", Map::new(), &ctx("s1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_input");

        let snap = executor.sessions.snapshot("s1").unwrap();
        assert_eq!(
            snap.tool_executions[0].error_kind.as_deref(),
            Some("validation_input")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_and_reports_kind() {
        let executor = executor();
        let err = executor
            .execute(
                "slow",
                Map::new(),
                &ctx("s1"),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn tool_raised_errors_become_execution_kind() {
        let executor = executor();
        let err = executor
            .execute("failing", Map::new(), &ctx("s1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "execution");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn every_invocation_is_indexed_for_retrieval() {
        let executor = executor();
        let _ = executor
            .execute("echo", obj(json!({"text": "searchable marker"})), &ctx("s1"), None)
            .await;

        let hits = executor
            .retrieval
            .search("searchable marker", 5, 0.3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.kind(), Some("tool_result"));
    }
}
