//! Tool-calling agent core.
//!
//! Drives conversational turns against a locally hosted model served over an
//! OpenAI Responses-compatible API, executing tools the model requests and
//! recovering an answer when the server drops the terminal message.
//!
//! # Architecture
//!
//! ```text
//! User input → TurnOrchestrator
//!   ├── LlmProvider::send_turn (conversation + tool catalog) → EventStream
//!   ├── ResponseAssembler (one per turn)
//!   │   ├── reasoning / message accumulation
//!   │   └── client tool calls → ToolExecutor → ToolRegistry
//!   ├── follow-up round while tools ran without an answer
//!   └── finalize: message → reasoning fallback → tool fallback → EmptyResponse
//! ```

pub mod assembler;
pub mod client;
pub mod config;
pub mod event;
pub mod executor;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod tool;
pub mod web_search;

// Re-export key types
pub use assembler::{AssemblerState, ResponseAssembler, RoundOutcome};
pub use client::create_provider;
pub use config::{Settings, SettingsBuilder};
pub use event::{Event, EventKind, EventObserver, EventStream, TurnResult};
pub use executor::ToolExecutor;
pub use message::{Conversation, ConversationEntry};
pub use orchestrator::{SessionInfo, TurnOrchestrator};
pub use provider::{HealthStatus, LlmProvider, TurnRequest, wait_for_server};
pub use tool::{
    Tool, ToolCall, ToolDefinition, ToolFailure, ToolOrigin, ToolOutput, ToolRegistry, ToolSpec,
    build_registry,
};
