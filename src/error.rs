//! Error types for oss-agent.
//!
//! Tool failures ([`ToolError`]) never leave the invocation pipeline: they
//! are turned into failure-marked tool outputs. Everything in
//! [`AgentError`] reaches the turn orchestrator, which decides whether the
//! turn is abandoned and how the conversation is repaired.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Agent, transport or protocol failure.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// CLI command failure.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while talking to the inference server or assembling a turn.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The server could not be reached after all retry attempts.
    #[error("server unreachable at {endpoint} after {attempts} attempt(s): {reason}")]
    Unreachable {
        /// URL that was contacted.
        endpoint: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transport failure.
        reason: String,
    },

    /// The server rejected the request with a client error (4xx). Never retried.
    #[error("server rejected request (HTTP {status}): {body}")]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned by the server.
        body: String,
    },

    /// The event stream failed mid-flight.
    #[error("stream error: {message}")]
    Stream {
        /// Failure description.
        message: String,
    },

    /// The server response could not be decoded.
    #[error("failed to parse server response: {message}")]
    ResponseParse {
        /// Failure description.
        message: String,
    },

    /// A tool output arrived for a call that is not pending in this turn.
    #[error("protocol violation: tool output for unknown call id '{call_id}'")]
    OrphanToolOutput {
        /// Call identifier carried by the output.
        call_id: String,
    },

    /// A server-side tool call never received its output before the stream ended.
    #[error("protocol violation: tool call '{call_id}' ({name}) never received an output")]
    IncompleteToolCall {
        /// Call identifier.
        call_id: String,
        /// Tool name.
        name: String,
    },

    /// The model kept requesting tools beyond the configured round limit.
    #[error("tool loop exceeded {max_rounds} round(s) without a final answer")]
    ToolLoopExceeded {
        /// Configured maximum number of tool-execution rounds.
        max_rounds: usize,
    },

    /// The server was reachable but produced nothing an answer could be built from.
    #[error("server responded but produced no usable output")]
    EmptyResponse,

    /// The overall turn deadline elapsed.
    #[error("turn timed out after {secs}s")]
    TurnTimeout {
        /// Deadline in seconds.
        secs: u64,
    },

    /// Invalid settings.
    #[error("configuration error: {message}")]
    Configuration {
        /// Failure description.
        message: String,
    },

    /// Unknown provider name in settings.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Requested provider name.
        name: String,
    },

    /// The user input was empty.
    #[error("input cannot be empty")]
    EmptyInput,
}

impl AgentError {
    /// Whether the failure happened before the server produced a usable
    /// response, so the turn should leave no trace in the conversation.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::ServerRejected { .. }
                | Self::Stream { .. }
                | Self::ResponseParse { .. }
                | Self::TurnTimeout { .. }
        )
    }
}

/// Tool-invocation failures. Recovered locally as failure-marked outputs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// Requested tool name.
        name: String,
    },

    /// Arguments did not match the tool's parameter schema.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// What was wrong.
        reason: String,
    },

    /// The capability itself failed.
    #[error("tool '{tool}' failed: {message}")]
    Execution {
        /// Tool name.
        tool: String,
        /// Failure description.
        message: String,
    },
}

/// CLI command errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command execution failed.
    #[error("{0}")]
    ExecutionFailed(String),

    /// Output formatting failed.
    #[error("output format error: {0}")]
    OutputFormat(String),
}
