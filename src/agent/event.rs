//! Events produced by the transport and the result of a finished turn.

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use super::tool::{ToolCall, ToolOutput};
use crate::error::AgentError;

/// One unit of server output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the turn, starting at 0.
    pub seq: usize,
    /// Payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub const fn new(seq: usize, kind: EventKind) -> Self {
        Self { seq, kind }
    }
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Model reasoning text.
    Reasoning {
        /// Reasoning text.
        text: String,
    },
    /// A tool call requested by the model.
    ToolCall(ToolCall),
    /// Output of a tool call.
    ToolOutput(ToolOutput),
    /// Terminal assistant message.
    Message {
        /// Message text.
        text: String,
    },
}

impl EventKind {
    /// Short label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall(_) => "tool_call",
            Self::ToolOutput(_) => "tool_output",
            Self::Message { .. } => "message",
        }
    }
}

/// Lazy, ordered, single-pass event sequence of one request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, AgentError>> + Send>>;

/// Callback invoked for every event the assembler records, in order.
pub type EventObserver = Box<dyn Fn(&Event) + Send + Sync>;

/// Final result of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    /// Answer text.
    pub text: String,
    /// Every event of the turn, across all rounds, including locally
    /// produced tool outputs.
    pub events: Vec<Event>,
    /// Whether the answer was reconstructed because no message arrived.
    pub used_fallback: bool,
    /// Number of request/stream rounds the turn took.
    pub rounds: usize,
}
