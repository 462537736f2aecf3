//! Tool invocation pipeline.
//!
//! [`ToolExecutor::invoke`] always produces a [`ToolOutput`] for the call it
//! is given. Lookup, validation and execution failures, including a panic
//! inside a capability, come back as failure-marked outputs so the turn can
//! keep going.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::tool::{ToolCall, ToolOutput, ToolRegistry, validate_arguments};
use crate::error::ToolError;

/// Maximum raw byte length of tool argument JSON from the model.
const MAX_TOOL_ARGS_LEN: usize = 100_000;

/// Executes tool calls against a registry.
pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> ToolExecutor<'a> {
    /// Creates an executor over the given registry.
    #[must_use]
    pub const fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    /// Runs one tool call to completion.
    pub async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        match self.run(call).await {
            Ok(content) => {
                debug!(tool = %call.name, call_id = %call.id, bytes = content.len(), "tool succeeded");
                ToolOutput::success(&call.id, content)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "tool failed");
                ToolOutput::failed(&call.id, &e)
            }
        }
    }

    async fn run(&self, call: &ToolCall) -> Result<String, ToolError> {
        let spec = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: call.name.clone(),
            })?;

        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return Err(ToolError::InvalidArguments {
                tool: call.name.clone(),
                reason: format!(
                    "arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
            });
        }

        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let args: Value = serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
            tool: call.name.clone(),
            reason: format!("arguments are not valid JSON: {e}"),
        })?;
        validate_arguments(&spec.definition, &args)?;

        AssertUnwindSafe(spec.capability.execute(&args))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                Err(ToolError::Execution {
                    tool: call.name.clone(),
                    message,
                })
            })
    }
}
