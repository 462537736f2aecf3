//! CLI command implementations.
//!
//! Each command builds [`Settings`] from flags and environment, creates the
//! provider, and bridges into async code with a tokio runtime.

use std::io::{self, BufRead, Write as IoWrite};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::debug;

use crate::agent::client::create_provider;
use crate::agent::config::Settings;
use crate::agent::event::{Event, EventKind, EventObserver, TurnResult};
use crate::agent::orchestrator::TurnOrchestrator;
use crate::agent::provider::{HealthStatus, LlmProvider, wait_for_server};
use crate::agent::providers::vllm::health_url_for;
use crate::cli::output::{
    OutputFormat, format_event, format_health, format_info, format_status, format_tools,
    format_turn,
};
use crate::cli::parser::{Cli, Commands};
use crate::cli::transcript::Transcript;
use crate::error::{CommandError, Result};

/// Polling interval for `health --wait`.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

const SHELL_HELP: &str = "Commands:
  /help       Show this help
  /clear      Start a new conversation
  /info       Show session information
  /tools      List available tools
  /reasoning  Toggle printing the model's reasoning
  /exit       Leave the chat (also /quit, Ctrl-D)";

/// Executes a non-interactive CLI command.
///
/// # Errors
///
/// Returns an error if settings are invalid, the server cannot be reached,
/// or the turn fails.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Chat { show_reasoning } => {
            let stdin = io::stdin();
            let mut stdout = io::stdout();
            let options = ShellOptions {
                format,
                show_reasoning: *show_reasoning,
                transcript: open_transcript(cli)?,
            };
            cmd_chat(cli, stdin.lock(), &mut stdout, options)
        }
        Commands::Ask { prompt, events } => cmd_ask(cli, prompt, *events, format),
        Commands::Health { wait } => cmd_health(cli, *wait, format),
        Commands::Status => cmd_status(cli, format),
    }
}

/// Builds settings: flags override environment, which overrides defaults.
pub fn build_settings(cli: &Cli) -> Result<Settings> {
    let mut builder = Settings::builder().from_env();
    if let Some(url) = &cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if cli.stream {
        builder = builder.streaming(true);
    }
    if cli.no_tools {
        builder = builder.enable_tools(false);
    }
    builder
        .build()
        .map_err(|e| CommandError::ExecutionFailed(format!("invalid configuration: {e}")).into())
}

fn runtime() -> Result<Runtime> {
    Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("failed to create async runtime: {e}")).into()
    })
}

fn provider(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    create_provider(settings)
        .map(Arc::from)
        .map_err(|e| CommandError::ExecutionFailed(format!("provider creation failed: {e}")).into())
}

fn open_transcript(cli: &Cli) -> Result<Option<Transcript>> {
    cli.transcript.as_deref().map(Transcript::open).transpose()
}

fn cmd_ask(cli: &Cli, prompt: &str, show_events: bool, format: OutputFormat) -> Result<String> {
    let settings = build_settings(cli)?;
    let mut transcript = open_transcript(cli)?;
    let mut orchestrator = TurnOrchestrator::new(provider(&settings)?, settings);
    let rt = runtime()?;

    let outcome = rt.block_on(orchestrator.run_turn(prompt));
    if let Some(transcript) = transcript.as_mut() {
        transcript.record(&orchestrator.settings().model, prompt, &outcome)?;
    }
    let result =
        outcome.map_err(|e| CommandError::ExecutionFailed(format!("turn failed: {e}")))?;
    format_turn(&result, format, show_events)
}

fn cmd_health(cli: &Cli, wait: Option<u64>, format: OutputFormat) -> Result<String> {
    let settings = build_settings(cli)?;
    let url = health_url_for(&settings.base_url)
        .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
    let provider = provider(&settings)?;
    let rt = runtime()?;

    let status = rt.block_on(async {
        match wait {
            Some(secs) => {
                match wait_for_server(
                    provider.as_ref(),
                    Duration::from_secs(secs),
                    HEALTH_POLL_INTERVAL,
                )
                .await
                {
                    Ok(()) => HealthStatus::Healthy,
                    Err(e) => HealthStatus::Unreachable {
                        reason: e.to_string(),
                    },
                }
            }
            None => provider.probe_health().await,
        }
    });

    let report = format_health(&url, &status, format)?;
    if status.is_healthy() {
        Ok(report)
    } else {
        Err(CommandError::ExecutionFailed(report).into())
    }
}

fn cmd_status(cli: &Cli, format: OutputFormat) -> Result<String> {
    let settings = build_settings(cli)?;
    let url = health_url_for(&settings.base_url)
        .map_err(|e| CommandError::ExecutionFailed(e.to_string()))?;
    let orchestrator = TurnOrchestrator::new(provider(&settings)?, settings);
    let rt = runtime()?;

    let (health, models) = rt.block_on(async {
        let health = orchestrator.provider().probe_health().await;
        let models = if health.is_healthy() {
            orchestrator
                .provider()
                .list_models()
                .await
                .map_err(|e| e.to_string())
        } else {
            Err("server is not healthy".to_string())
        };
        (health, models)
    });

    format_status(&orchestrator.info(), &url, &health, &models, format)
}

/// A line typed into the chat shell that is not a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// `/help`
    Help,
    /// `/clear`
    Clear,
    /// `/info`
    Info,
    /// `/tools`
    Tools,
    /// `/reasoning`
    Reasoning,
    /// `/exit` or `/quit`
    Exit,
    /// Any other `/word`.
    Unknown(String),
}

impl ShellCommand {
    /// Parses a shell command; `None` means the line is a message.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.trim().strip_prefix('/')?;
        let word = word.split_whitespace().next().unwrap_or_default();
        Some(match word.to_ascii_lowercase().as_str() {
            "help" | "h" | "?" => Self::Help,
            "clear" | "reset" => Self::Clear,
            "info" => Self::Info,
            "tools" => Self::Tools,
            "reasoning" | "toggle-reasoning" => Self::Reasoning,
            "exit" | "quit" | "q" => Self::Exit,
            _ => Self::Unknown(word.to_string()),
        })
    }
}

/// Chat shell settings that can change during a session.
pub struct ShellOptions {
    /// Output format for answers and reports.
    pub format: OutputFormat,
    /// Print reasoning events before each answer.
    pub show_reasoning: bool,
    /// Turn-by-turn record, if requested.
    pub transcript: Option<Transcript>,
}

fn cmd_chat<R: BufRead, W: IoWrite>(
    cli: &Cli,
    input: R,
    output: &mut W,
    options: ShellOptions,
) -> Result<String> {
    let settings = build_settings(cli)?;
    let provider = provider(&settings)?;
    let rt = runtime()?;

    let health = rt.block_on(provider.probe_health());
    if let HealthStatus::Unreachable { reason } = &health {
        writeln!(
            output,
            "Warning: server at {} is not responding ({reason}). Messages will fail until it is up.",
            settings.base_url
        )?;
    }

    let trace: EventObserver = Box::new(|event: &Event| {
        if !matches!(event.kind, EventKind::Message { .. }) {
            let _ = writeln!(io::stderr(), "  {}", format_event(event));
        }
    });
    let mut orchestrator = TurnOrchestrator::new(provider, settings);
    if cli.verbose {
        orchestrator = orchestrator.with_observer(trace);
    }

    writeln!(
        output,
        "Chatting with {}. Type /help for commands.",
        orchestrator.settings().model
    )?;
    run_shell(&rt, &mut orchestrator, input, output, options)
}

fn write_reasoning<W: IoWrite>(output: &mut W, result: &TurnResult) -> io::Result<()> {
    for event in &result.events {
        if let EventKind::Reasoning { text } = &event.kind {
            writeln!(output, "\nReasoning: {}", text.trim())?;
        }
    }
    Ok(())
}

/// Reads lines until EOF or `/exit`, running one turn per message.
fn run_shell<R: BufRead, W: IoWrite>(
    rt: &Runtime,
    orchestrator: &mut TurnOrchestrator,
    input: R,
    output: &mut W,
    mut options: ShellOptions,
) -> Result<String> {
    let format = options.format;
    let mut lines = input.lines();
    loop {
        write!(output, "\nYou: ")?;
        output.flush()?;

        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match ShellCommand::parse(line) {
            Some(ShellCommand::Exit) => break,
            Some(ShellCommand::Help) => writeln!(output, "{SHELL_HELP}")?,
            Some(ShellCommand::Clear) => {
                orchestrator.clear();
                writeln!(output, "Conversation cleared.")?;
            }
            Some(ShellCommand::Info) => {
                writeln!(output, "{}", format_info(&orchestrator.info(), format)?)?;
            }
            Some(ShellCommand::Tools) => {
                let tools = orchestrator.registry().definitions();
                writeln!(output, "{}", format_tools(&tools, format)?)?;
            }
            Some(ShellCommand::Reasoning) => {
                options.show_reasoning = !options.show_reasoning;
                let state = if options.show_reasoning { "on" } else { "off" };
                writeln!(output, "Reasoning display {state}.")?;
            }
            Some(ShellCommand::Unknown(word)) => {
                writeln!(output, "Unknown command: /{word}. Type /help for commands.")?;
            }
            None => {
                debug!(chars = line.len(), "user message");
                let outcome = rt.block_on(orchestrator.run_turn(line));
                if let Some(transcript) = options.transcript.as_mut() {
                    transcript.record(&orchestrator.settings().model, line, &outcome)?;
                }
                match outcome {
                    Ok(result) => {
                        if options.show_reasoning && format == OutputFormat::Text {
                            write_reasoning(output, &result)?;
                        }
                        let text = format_turn(&result, format, false)?;
                        writeln!(output, "\nAssistant: {text}")?;
                    }
                    Err(e) => writeln!(output, "\nError: {e}")?,
                }
            }
        }
    }

    Ok("Goodbye!".to_string())
}
