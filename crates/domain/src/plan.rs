//! Workflow plans: an ordered, dependency-aware list of tool invocations,
//! plus the canonical planner response union every LLM reply is normalized
//! into before any downstream code touches it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Default number of retries granted to a step beyond its first attempt.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One tool invocation inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub description: String,
    pub tool: String,
    pub args: Map<String, Value>,
    /// Step ids that must complete before this step may run.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_status")]
    pub status: StepStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_status() -> StepStatus {
    StepStatus::Pending
}

fn default_retry_budget() -> u32 {
    DEFAULT_RETRY_BUDGET
}

impl Step {
    pub fn new(
        step_id: impl Into<String>,
        tool: impl Into<String>,
        description: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            description: description.into(),
            tool: tool.into(),
            args,
            depends_on: Vec::new(),
            status: StepStatus::Pending,
            retry_count: 0,
            retry_budget: DEFAULT_RETRY_BUDGET,
            result: None,
            error: None,
        }
    }

    /// A step is terminal once it completed, was cancelled, or failed with
    /// its retry budget spent.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            StepStatus::Completed | StepStatus::Cancelled => true,
            StepStatus::Failed => self.retry_count >= self.retry_budget,
            _ => false,
        }
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.retry_budget
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ordered list of steps. Mutable: the agent loop may append steps
/// decided mid-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            estimated_duration: None,
            steps,
        }
    }

    /// Index of the next non-terminal step whose dependencies are all
    /// completed, searching from `cursor`.
    pub fn next_runnable(&self, cursor: usize) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(cursor)
            .find(|(_, s)| !s.is_terminal() && self.deps_satisfied(s))
            .map(|(i, _)| i)
    }

    fn deps_satisfied(&self, step: &Step) -> bool {
        step.depends_on.iter().all(|dep| {
            self.steps
                .iter()
                .any(|s| &s.step_id == dep && s.status == StepStatus::Completed)
        })
    }

    pub fn completed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Fraction of terminal steps, for `workflow_progress` events.
    pub fn progress(&self) -> f32 {
        if self.steps.is_empty() {
            return 1.0;
        }
        let done = self.steps.iter().filter(|s| s.is_terminal()).count();
        done as f32 / self.steps.len() as f32
    }

    /// Append steps decided mid-loop. Steps referencing unknown dependency
    /// ids are appended with those dependencies dropped rather than
    /// rejected, so a sloppy planner reply cannot wedge the plan.
    pub fn append(&mut self, mut steps: Vec<Step>) {
        let known: Vec<String> = self.steps.iter().map(|s| s.step_id.clone()).collect();
        for step in &mut steps {
            step.depends_on.retain(|d| known.contains(d));
        }
        self.steps.extend(steps);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical planner responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One tool call as proposed by the planner, before it becomes a [`Step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCall {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

/// The five shapes a planner reply is normalized into. Downstream code
/// matches on this union only; raw model output never leaves the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "response_type", rename_all = "snake_case")]
pub enum PlannerResponse {
    Conversational {
        user_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_hints: Option<Value>,
    },
    Informational {
        user_message: String,
        #[serde(default)]
        suggestions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tutorial: Option<String>,
    },
    Workflow {
        user_message: String,
        #[serde(default)]
        reasoning: String,
        tool_calls: Vec<PlannedCall>,
    },
    Interactive {
        user_message: String,
        #[serde(default)]
        user_input_request: Value,
    },
    Adaptive {
        user_message: String,
        #[serde(default)]
        context_update: Map<String, Value>,
        #[serde(default)]
        preferences: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        learning: Option<String>,
    },
}

impl PlannerResponse {
    /// The assistant text carried by any shape.
    pub fn user_message(&self) -> &str {
        match self {
            PlannerResponse::Conversational { user_message, .. }
            | PlannerResponse::Informational { user_message, .. }
            | PlannerResponse::Workflow { user_message, .. }
            | PlannerResponse::Interactive { user_message, .. }
            | PlannerResponse::Adaptive { user_message, .. } => user_message,
        }
    }
}
