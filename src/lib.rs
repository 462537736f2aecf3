//! # oss-agent
//!
//! Tool-calling chat agent for open-weight models served locally through an
//! OpenAI Responses-compatible API (vLLM serving gpt-oss).
//!
//! The server is known to finish some multi-tool turns without sending the
//! final message. The agent tolerates this: every turn's events go through a
//! [`ResponseAssembler`](agent::ResponseAssembler) that recovers an answer
//! from reasoning text or tool output, and reports a genuinely empty
//! response as an error rather than an empty success.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oss_agent::agent::{Settings, TurnOrchestrator, create_provider};
//!
//! # async fn run() -> Result<(), oss_agent::error::AgentError> {
//! let settings = Settings::builder().from_env().build()?;
//! let provider = Arc::from(create_provider(&settings)?);
//! let mut agent = TurnOrchestrator::new(provider, settings);
//!
//! let result = agent.run_turn("What is 2+2?").await?;
//! assert!(!result.text.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cli;
pub mod error;

pub use agent::{Settings, TurnOrchestrator, TurnResult};
pub use error::{AgentError, Error, Result, ToolError};
