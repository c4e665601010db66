//! The tool registry: name-keyed descriptors with handler objects, free-
//! text discovery, and the catalog rendering fed to the planning model.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use cf_domain::error::Result;
use cf_domain::tool::{ToolDescriptor, ToolSchema};

use crate::schema::infer_schema;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The tool wire contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An invocable capability. Implementations declare their schemas; a tool
/// that returns `None` from [`Tool::input_schema`] gets one inferred from
/// [`Tool::parameters`] (every parameter typed `any`, required iff it has
/// no default).
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn input_schema(&self) -> Option<ToolSchema> {
        None
    }

    fn output_schema(&self) -> Option<ToolSchema> {
        None
    }

    /// Parameter names and defaults, used only when no input schema is
    /// declared.
    fn parameters(&self) -> Vec<(&str, Option<Value>)> {
        Vec::new()
    }

    fn category(&self) -> &str {
        "general"
    }

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    fn examples(&self) -> Vec<String> {
        Vec::new()
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Execute with a validated input map. The map always carries
    /// `session_id`.
    async fn run(&self, input: Map<String, Value>) -> Result<Map<String, Value>>;
}

/// A registered tool: its descriptor plus the handler behind it.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn Tool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-heavy registry; registration happens at startup, readers see a
/// stable snapshot.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A duplicate name replaces the prior registration
    /// (development convenience) with a warning.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let input_schema = tool
            .input_schema()
            .unwrap_or_else(|| infer_schema(&tool.parameters()));
        let output_schema = tool.output_schema().unwrap_or_default();

        let descriptor = ToolDescriptor {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema,
            output_schema,
            category: tool.category().to_string(),
            capabilities: tool.capabilities(),
            examples: tool.examples(),
            version: tool.version().to_string(),
        };

        let mut tools = self.tools.write();
        if tools.contains_key(&descriptor.name) {
            tracing::warn!(tool = %descriptor.name, "replacing existing tool registration");
        }
        tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler: tool,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().get(name).cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).map(|t| t.descriptor.clone())
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut all: Vec<ToolDescriptor> = self
            .tools
            .read()
            .values()
            .map(|t| t.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Free-text discovery: case-insensitive substring match over name,
    /// description, category, and capability tags. An empty query returns
    /// everything. `boost` names tools with relevant prior successful
    /// executions (from the retrieval index); they rank first.
    pub fn discover(&self, query: &str, boost: &[String]) -> Vec<ToolDescriptor> {
        let query = query.trim().to_lowercase();
        let mut hits: Vec<ToolDescriptor> = if query.is_empty() {
            self.list()
        } else {
            self.list()
                .into_iter()
                .filter(|d| {
                    d.name.to_lowercase().contains(&query)
                        || d.description.to_lowercase().contains(&query)
                        || d.category.to_lowercase().contains(&query)
                        || d.capabilities
                            .iter()
                            .any(|c| c.to_lowercase().contains(&query))
                })
                .collect()
        };

        if !boost.is_empty() {
            hits.sort_by_key(|d| {
                let boosted = boost.contains(&d.name);
                (!boosted, d.name.clone())
            });
        }
        hits
    }

    /// Render the catalog for LLM consumption: one block per tool with
    /// description, parameters, and examples.
    pub fn format_catalog(&self) -> String {
        let mut out = String::new();
        for desc in self.list() {
            out.push_str(&format!("- {}: {}\n", desc.name, desc.description));
            if !desc.input_schema.is_empty() {
                let params: Vec<String> = desc
                    .input_schema
                    .iter()
                    .map(|(name, spec)| {
                        if spec.required {
                            format!("{name} (required)")
                        } else {
                            name.clone()
                        }
                    })
                    .collect();
                out.push_str(&format!("  parameters: {}\n", params.join(", ")));
            }
            for example in &desc.examples {
                out.push_str(&format!("  example: {example}\n"));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
