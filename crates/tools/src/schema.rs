//! Schema validation for tool inputs and outputs, plus development-time
//! schema inference for tools that declare only parameter names.

use serde_json::{Map, Value};

use cf_domain::error::{Error, Result};
use cf_domain::tool::{ParamSpec, ParamType, ToolSchema};

/// Validate `input` against `schema`: apply declared defaults for missing
/// optional parameters, reject missing required ones and type mismatches.
/// Undeclared keys pass through untouched (context fields like `session_id`
/// ride along).
pub fn validate_input(
    tool: &str,
    schema: &ToolSchema,
    mut input: Map<String, Value>,
) -> Result<Map<String, Value>> {
    for (name, spec) in schema {
        match input.get(name) {
            Some(value) => {
                if !spec.param_type.accepts(value) {
                    return Err(Error::ValidationInput {
                        tool: tool.to_string(),
                        message: format!(
                            "parameter '{name}' expects {:?}, got {}",
                            spec.param_type,
                            type_name(value)
                        ),
                    });
                }
            }
            None => {
                if let Some(default) = &spec.default {
                    input.insert(name.clone(), default.clone());
                } else if spec.required {
                    return Err(Error::ValidationInput {
                        tool: tool.to_string(),
                        message: format!("missing required parameter '{name}'"),
                    });
                }
            }
        }
    }
    Ok(input)
}

/// Validate a tool's output against its declared output schema. Extra
/// fields are allowed; the executor's augmentation fields always ride
/// along.
pub fn validate_output(tool: &str, schema: &ToolSchema, output: &Map<String, Value>) -> Result<()> {
    for (name, spec) in schema {
        match output.get(name) {
            Some(value) => {
                if !spec.param_type.accepts(value) {
                    return Err(Error::ValidationOutput {
                        tool: tool.to_string(),
                        message: format!(
                            "output field '{name}' expects {:?}, got {}",
                            spec.param_type,
                            type_name(value)
                        ),
                    });
                }
            }
            None if spec.required => {
                return Err(Error::ValidationOutput {
                    tool: tool.to_string(),
                    message: format!("missing output field '{name}'"),
                });
            }
            None => {}
        }
    }
    Ok(())
}

/// Build a schema from bare parameter names and optional defaults, for
/// tools that do not declare one. Every parameter is typed `any` and
/// required exactly when it has no default.
pub fn infer_schema(params: &[(&str, Option<Value>)]) -> ToolSchema {
    params
        .iter()
        .map(|(name, default)| {
            let spec = ParamSpec {
                param_type: ParamType::Any,
                required: default.is_none(),
                default: default.clone(),
                description: None,
            };
            (name.to_string(), spec)
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
