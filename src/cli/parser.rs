//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// oss-agent: tool-calling chat agent for locally hosted gpt-oss models.
///
/// Talks to a vLLM (or other Responses-compatible) server. Settings come
/// from flags, then environment variables (`VLLM_BASE_URL`, `DEFAULT_MODEL`,
/// `EXA_API_KEY`, ...), then defaults.
#[derive(Parser, Debug)]
#[command(name = "oss-agent")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base URL of the server, API prefix included.
    ///
    /// Defaults to `http://localhost:8000/v1`.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Model identifier.
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Stream responses instead of waiting for the full response.
    #[arg(long, global = true)]
    pub stream: bool,

    /// Disable all tools for this session.
    #[arg(long, global = true)]
    pub no_tools: bool,

    /// Enable verbose (debug) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Append a JSON line per turn (input, events, answer or error) to this file.
    #[arg(long, global = true)]
    pub transcript: Option<PathBuf>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session.
    ///
    /// Type a message and press enter. Lines starting with `/` are shell
    /// commands: /help, /clear, /info, /tools, /reasoning, /exit.
    #[command(after_help = r#"Examples:
  oss-agent chat                                 # Chat with defaults
  oss-agent --stream chat                        # Stream responses
  oss-agent --model openai/gpt-oss-120b chat     # Use a different model
  oss-agent chat --show-reasoning                # Print reasoning before answers
  oss-agent --transcript session.jsonl chat      # Keep a turn-by-turn record
"#)]
    Chat {
        /// Print the model's reasoning before each answer (toggle with /reasoning).
        #[arg(long)]
        show_reasoning: bool,
    },

    /// Ask a single question and print the answer.
    #[command(after_help = r#"Examples:
  oss-agent ask "What is 2+2?"
  oss-agent ask "Latest Rust release?" --events  # Show the event trace
  oss-agent --format json ask "Hi" | jq '.used_fallback'
"#)]
    Ask {
        /// The question.
        prompt: String,

        /// Print the turn's events after the answer.
        #[arg(short, long)]
        events: bool,
    },

    /// Check whether the server is up.
    #[command(after_help = r#"Examples:
  oss-agent health                                # Probe once
  oss-agent health --wait 60                      # Wait up to a minute
  oss-agent --base-url http://gpu-box:8000/v1 health
"#)]
    Health {
        /// Keep probing for up to this many seconds.
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Show server health, available models and configured tools.
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "oss-agent",
            "ask",
            "hello",
            "--model",
            "m",
            "--stream",
            "--format",
            "json",
        ])
        .unwrap_or_else(|_| unreachable!());
        assert_eq!(cli.model.as_deref(), Some("m"));
        assert!(cli.stream);
        assert_eq!(cli.format, "json");
        assert!(matches!(cli.command, Commands::Ask { ref prompt, events: false } if prompt == "hello"));
    }

    #[test]
    fn test_chat_options() {
        let cli = Cli::try_parse_from([
            "oss-agent",
            "--transcript",
            "session.jsonl",
            "chat",
            "--show-reasoning",
        ])
        .unwrap_or_else(|_| unreachable!());
        assert_eq!(cli.transcript, Some(PathBuf::from("session.jsonl")));
        assert!(matches!(cli.command, Commands::Chat { show_reasoning: true }));
    }

    #[test]
    fn test_health_wait() {
        let cli = Cli::try_parse_from(["oss-agent", "health", "--wait", "30"])
            .unwrap_or_else(|_| unreachable!());
        assert!(matches!(cli.command, Commands::Health { wait: Some(30) }));
    }
}
