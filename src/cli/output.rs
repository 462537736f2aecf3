//! Output formatting for CLI commands.

use std::fmt::Write;

use serde::Serialize;
use serde_json::json;

use crate::agent::event::{Event, EventKind, TurnResult};
use crate::agent::orchestrator::SessionInfo;
use crate::agent::provider::HealthStatus;
use crate::agent::tool::ToolDefinition;
use crate::error::{CommandError, Result};

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format name; anything unrecognized is text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CommandError::OutputFormat(format!("JSON serialization failed: {e}")).into())
}

fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let head: String = flat.chars().take(max).collect();
        format!("{head}...")
    }
}

/// One line per event, for `--events` and the chat trace.
#[must_use]
pub fn format_event(event: &Event) -> String {
    match &event.kind {
        EventKind::Reasoning { text } => format!("[{}] reasoning: {}", event.seq, preview(text, 80)),
        EventKind::ToolCall(call) => format!(
            "[{}] tool call: {}({}) id={}",
            event.seq,
            call.name,
            preview(&call.arguments, 60),
            call.id
        ),
        EventKind::ToolOutput(output) => format!(
            "[{}] tool output{}: {} id={}",
            event.seq,
            if output.is_success() { "" } else { " (failed)" },
            preview(&output.content, 60),
            output.call_id
        ),
        EventKind::Message { text } => format!("[{}] message: {}", event.seq, preview(text, 80)),
    }
}

/// Formats a finished turn.
pub fn format_turn(result: &TurnResult, format: OutputFormat, show_events: bool) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(result),
        OutputFormat::Text => {
            let mut out = result.text.clone();
            if result.used_fallback {
                out.push_str("\n\n(answer reconstructed: the server sent no final message)");
            }
            if show_events {
                out.push_str("\n\n---\n");
                for event in &result.events {
                    let _ = writeln!(out, "{}", format_event(event));
                }
                let _ = write!(
                    out,
                    "Rounds: {} | Events: {}",
                    result.rounds,
                    result.events.len()
                );
            }
            Ok(out)
        }
    }
}

/// Formats a health probe.
pub fn format_health(url: &str, status: &HealthStatus, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(&json!({
            "url": url,
            "healthy": status.is_healthy(),
            "reason": match status {
                HealthStatus::Healthy => None,
                HealthStatus::Unreachable { reason } => Some(reason),
            },
        })),
        OutputFormat::Text => Ok(match status {
            HealthStatus::Healthy => format!("Server at {url} is healthy"),
            HealthStatus::Unreachable { reason } => {
                format!("Server at {url} is unreachable: {reason}")
            }
        }),
    }
}

/// Formats session info.
pub fn format_info(info: &SessionInfo, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(info),
        OutputFormat::Text => {
            let tools = if info.tools.is_empty() {
                "none".to_string()
            } else {
                info.tools.join(", ")
            };
            Ok(format!(
                "Provider:  {}\nModel:     {}\nServer:    {}\nStreaming: {}\nTools:     {tools}\nTurns:     {}",
                info.provider, info.model, info.base_url, info.streaming, info.turns
            ))
        }
    }
}

/// Formats the tool catalog.
pub fn format_tools(tools: &[ToolDefinition], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(tools),
        OutputFormat::Text => {
            if tools.is_empty() {
                return Ok("No tools available. Set EXA_API_KEY to enable web search.".to_string());
            }
            let mut out = String::from("Available tools:");
            for tool in tools {
                let _ = write!(out, "\n  {}: {}", tool.name, tool.description);
            }
            Ok(out)
        }
    }
}

/// Formats the `status` report.
pub fn format_status(
    info: &SessionInfo,
    health_url: &str,
    health: &HealthStatus,
    models: &std::result::Result<Vec<String>, String>,
    format: OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(&json!({
            "session": info,
            "health": {
                "url": health_url,
                "healthy": health.is_healthy(),
            },
            "models": models.as_ref().ok(),
            "models_error": models.as_ref().err(),
        })),
        OutputFormat::Text => {
            let mut out = format_info(info, OutputFormat::Text)?;
            out.push('\n');
            out.push_str(&format_health(health_url, health, OutputFormat::Text)?);
            match models {
                Ok(models) if models.is_empty() => out.push_str("\nModels:    none reported"),
                Ok(models) => {
                    let _ = write!(out, "\nModels:    {}", models.join(", "));
                }
                Err(e) => {
                    let _ = write!(out, "\nModels:    unavailable ({e})");
                }
            }
            Ok(out)
        }
    }
}
