//! CLI layer for oss-agent.
//!
//! Provides the command-line interface using clap: an interactive chat
//! shell, single-shot questions, and server health/status checks.

pub mod commands;
pub mod output;
pub mod parser;
pub mod transcript;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};
pub use transcript::Transcript;
