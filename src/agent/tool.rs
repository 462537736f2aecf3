//! Tool types and the per-session tool registry.
//!
//! Provides provider-agnostic types for tool definitions, calls and outputs,
//! the [`Tool`] capability boundary, and [`build_registry`], which turns
//! [`Settings`] into a fixed catalog once per session.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::config::Settings;
use super::web_search::{ExaClient, PageContentTool, WebSearchTool};
use crate::error::ToolError;

/// A tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique within a registry).
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub parameters: Value,
}

/// Who executes a tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    /// A function tool from our catalog; executed locally.
    #[default]
    Client,
    /// A tool hosted by the inference server; its output arrives in the stream.
    Server,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, unique within the turn.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
    /// Who executes the call.
    #[serde(default)]
    pub origin: ToolOrigin,
}

/// Failure marker carried by a [`ToolOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailure {
    /// No such tool in the registry.
    UnknownTool,
    /// Arguments failed schema validation.
    InvalidArguments,
    /// The capability failed while running.
    Execution,
}

impl From<&ToolError> for ToolFailure {
    fn from(err: &ToolError) -> Self {
        match err {
            ToolError::UnknownTool { .. } => Self::UnknownTool,
            ToolError::InvalidArguments { .. } => Self::InvalidArguments,
            ToolError::Execution { .. } => Self::Execution,
        }
    }
}

/// The output of one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// ID of the tool call this output answers.
    pub call_id: String,
    /// Result text on success, error message on failure.
    pub content: String,
    /// Set when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ToolFailure>,
}

impl ToolOutput {
    /// A successful output.
    #[must_use]
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            failure: None,
        }
    }

    /// A failure-marked output built from a tool error.
    #[must_use]
    pub fn failed(call_id: impl Into<String>, err: &ToolError) -> Self {
        Self {
            call_id: call_id.into(),
            content: err.to_string(),
            failure: Some(ToolFailure::from(err)),
        }
    }

    /// Whether the call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// An executable capability.
///
/// This is the whole contract with a concrete tool: a definition (name and
/// parameter schema) and an `execute` that returns text or fails.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool with schema-validated arguments.
    async fn execute(&self, args: &Value) -> Result<String, ToolError>;
}

/// A registered tool: its definition plus the capability that runs it.
#[derive(Clone)]
pub struct ToolSpec {
    /// Definition advertised to the model.
    pub definition: ToolDefinition,
    /// The executable.
    pub capability: Arc<dyn Tool>,
}

impl ToolSpec {
    /// Wraps a capability, caching its definition.
    pub fn new(capability: Arc<dyn Tool>) -> Self {
        Self {
            definition: capability.definition(),
            capability,
        }
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

/// The tool catalog of one session. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    /// Builds a registry from specs. A later spec with a duplicate name replaces
    /// the earlier one.
    #[must_use]
    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        let tools = specs
            .into_iter()
            .map(|spec| (spec.definition.name.clone(), spec))
            .collect();
        Self { tools }
    }

    /// Empty registry (no tools available).
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Tool definitions, ordered by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|s| s.definition.clone()).collect()
    }

    /// Tool names, ordered.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// Builds the session's tool registry from settings.
///
/// Each optional capability is included only when its configuration is
/// present, so the same settings always yield the same catalog, and an
/// unconfigured session yields an empty one.
pub fn build_registry(settings: &Settings) -> ToolRegistry {
    let mut specs = Vec::new();

    if settings.web_search_configured() {
        if let Some(key) = settings.exa_api_key.as_deref() {
            let client = Arc::new(ExaClient::new(key, settings.timeout));
            specs.push(ToolSpec::new(Arc::new(WebSearchTool::new(
                Arc::clone(&client),
                settings.web_search_max_results,
            ))));
            specs.push(ToolSpec::new(Arc::new(PageContentTool::new(client))));
        }
    } else {
        debug!("web search tools disabled: no Exa API key configured");
    }

    let registry = ToolRegistry::from_specs(specs);
    info!(tools = ?registry.names(), "tool registry built");
    registry
}

/// Checks arguments against a tool's parameter schema.
///
/// Covers the subset of JSON Schema the catalog uses: object shape,
/// `required`, primitive `type` per property, `enum`, integer
/// `minimum`/`maximum`, and `additionalProperties: false`.
pub fn validate_arguments(definition: &ToolDefinition, args: &Value) -> Result<(), ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: definition.name.clone(),
        reason,
    };

    let schema = &definition.parameters;
    let Some(obj) = args.as_object() else {
        return Err(invalid("arguments must be a JSON object".to_string()));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(field) {
                return Err(invalid(format!("missing required field: '{field}'")));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in obj {
        let Some(prop) = properties.and_then(|p| p.get(key)) else {
            if closed {
                return Err(invalid(format!("unexpected field: '{key}'")));
            }
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(invalid(format!("field '{key}' must be of type {expected}")));
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(invalid(format!("field '{key}' is not one of the allowed values")));
            }
        }

        if let Some(n) = value.as_f64() {
            if prop.get("minimum").and_then(Value::as_f64).is_some_and(|min| n < min) {
                return Err(invalid(format!("field '{key}' is below its minimum")));
            }
            if prop.get("maximum").and_then(Value::as_f64).is_some_and(|max| n > max) {
                return Err(invalid(format!("field '{key}' is above its maximum")));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}
