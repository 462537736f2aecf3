//! Response assembler: the per-turn state machine.
//!
//! Consumes the ordered event stream of one turn, runs client-side tool
//! calls through the [`ToolExecutor`] as they arrive, and decides the final
//! answer. When the server finishes a turn without a terminal message the
//! answer is reconstructed from reasoning text or, failing that, from the
//! last successful tool output.
//!
//! ```text
//! COLLECTING --tool call--> AWAITING_TOOL_OUTPUTS --all answered--> COLLECTING
//!      |                                                              |
//!      +--------- message / round end ----> FINALIZING ----> DONE <---+
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use futures_util::StreamExt;
use regex::Regex;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;

use super::event::{Event, EventKind, EventObserver, EventStream, TurnResult};
use super::executor::ToolExecutor;
use super::message::ConversationEntry;
use super::tool::{ToolCall, ToolOrigin, ToolOutput};
use crate::error::AgentError;

/// Minimum length, in characters, of a reasoning paragraph used as an answer.
const MIN_ANSWER_PARAGRAPH: usize = 50;
/// Tool output excerpt length for the tool-tier fallback, in graphemes.
const TOOL_EXCERPT_LEN: usize = 500;

static PARAGRAPH_BREAK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").ok());
static PLANNING_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^(i need to|let me|we need)\b").ok());

/// Assembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Accumulating reasoning and waiting for a message.
    Collecting,
    /// At least one tool call has no output yet.
    AwaitingToolOutputs,
    /// A message arrived; later events are recorded only.
    Finalizing,
    /// The turn result has been produced.
    Done,
}

/// What the orchestrator should do after a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Client tools ran and no answer arrived: append these entries and
    /// send another request.
    FollowUp {
        /// Tool call and output entries of the round, in order.
        entries: Vec<ConversationEntry>,
    },
    /// The turn is complete.
    Finished(TurnResult),
}

/// Per-turn response assembler.
pub struct ResponseAssembler<'a> {
    executor: ToolExecutor<'a>,
    observer: Option<&'a EventObserver>,
    state: AssemblerState,
    reasoning: Vec<String>,
    message: Option<String>,
    /// Calls awaiting an output, by id.
    pending: BTreeMap<String, String>,
    /// Tool name of every call seen this turn, by id.
    call_names: HashMap<String, String>,
    /// Calls recorded after the message; their outputs are accepted unexecuted.
    late_calls: HashSet<String>,
    /// Rounds in which client tools ran.
    tool_rounds: usize,
    tool_round_limit: Option<usize>,
    last_success: Option<(String, String)>,
    events: Vec<Event>,
    round_entries: Vec<ConversationEntry>,
    rounds: usize,
}

impl<'a> ResponseAssembler<'a> {
    /// Creates an assembler for one turn.
    #[must_use]
    pub fn new(executor: ToolExecutor<'a>) -> Self {
        Self {
            executor,
            observer: None,
            state: AssemblerState::Collecting,
            reasoning: Vec::new(),
            message: None,
            pending: BTreeMap::new(),
            call_names: HashMap::new(),
            late_calls: HashSet::new(),
            tool_rounds: 0,
            tool_round_limit: None,
            last_success: None,
            events: Vec::new(),
            round_entries: Vec::new(),
            rounds: 0,
        }
    }

    /// Registers a callback that sees every recorded event.
    #[must_use]
    pub fn with_observer(mut self, observer: Option<&'a EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Caps the number of rounds that may execute client tools. A client
    /// call in a round past the cap fails the turn before anything runs.
    #[must_use]
    pub fn with_tool_round_limit(mut self, limit: usize) -> Self {
        self.tool_round_limit = Some(limit);
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AssemblerState {
        self.state
    }

    /// Starts a new request/stream round.
    pub fn begin_round(&mut self) {
        self.rounds += 1;
        self.round_entries.clear();
        if self.state != AssemblerState::Finalizing {
            self.state = if self.pending.is_empty() {
                AssemblerState::Collecting
            } else {
                AssemblerState::AwaitingToolOutputs
            };
        }
        debug!(round = self.rounds, "round started");
    }

    /// Drains a stream, processing events in order.
    ///
    /// Stops at the first transport or protocol error.
    pub async fn consume(&mut self, mut stream: EventStream) -> Result<(), AgentError> {
        while let Some(item) = stream.next().await {
            self.process(item?).await?;
        }
        Ok(())
    }

    /// Processes one event.
    ///
    /// Client-origin tool calls are executed before this returns, and their
    /// outputs go through the same path as server-sent outputs.
    pub async fn process(&mut self, event: Event) -> Result<(), AgentError> {
        if self.state == AssemblerState::Done {
            warn!(kind = event.kind.label(), "event after turn completion ignored");
            return Ok(());
        }

        let kind = event.kind;
        self.record(kind.clone());

        match kind {
            EventKind::Reasoning { text } => {
                if !text.trim().is_empty() {
                    self.reasoning.push(text);
                }
            }
            EventKind::ToolCall(call) => self.on_tool_call(call).await?,
            EventKind::ToolOutput(output) => self.on_tool_output(&output)?,
            EventKind::Message { text } => self.on_message(text),
        }
        Ok(())
    }

    async fn on_tool_call(&mut self, call: ToolCall) -> Result<(), AgentError> {
        if self.state == AssemblerState::Finalizing {
            debug!(tool = %call.name, call_id = %call.id, "tool call after message recorded, not executed");
            self.call_names.insert(call.id.clone(), call.name);
            self.late_calls.insert(call.id);
            return Ok(());
        }

        let first_client_call = call.origin == ToolOrigin::Client && self.round_entries.is_empty();
        if first_client_call {
            if let Some(limit) = self.tool_round_limit.filter(|l| self.tool_rounds >= *l) {
                warn!(tool = %call.name, limit, "tool round limit reached, call not executed");
                return Err(AgentError::ToolLoopExceeded { max_rounds: limit });
            }
            self.tool_rounds += 1;
        }

        if self.call_names.contains_key(&call.id) {
            warn!(call_id = %call.id, "duplicate tool call id in turn");
        }
        self.call_names.insert(call.id.clone(), call.name.clone());
        self.pending.insert(call.id.clone(), call.name.clone());
        self.state = AssemblerState::AwaitingToolOutputs;

        if call.origin == ToolOrigin::Server {
            debug!(tool = %call.name, call_id = %call.id, "server-side tool call pending");
            return Ok(());
        }

        info!(tool = %call.name, call_id = %call.id, "executing tool");
        let output = self.executor.invoke(&call).await;
        self.record(EventKind::ToolOutput(output.clone()));
        self.on_tool_output(&output)?;
        self.round_entries.push(ConversationEntry::ToolCall(call));
        self.round_entries.push(ConversationEntry::ToolOutput(output));
        Ok(())
    }

    fn on_tool_output(&mut self, output: &ToolOutput) -> Result<(), AgentError> {
        if self.late_calls.remove(&output.call_id) {
            debug!(call_id = %output.call_id, "output for late tool call recorded");
            return Ok(());
        }
        let Some(name) = self.pending.remove(&output.call_id) else {
            return Err(AgentError::OrphanToolOutput {
                call_id: output.call_id.clone(),
            });
        };

        if output.is_success() {
            self.last_success = Some((name, output.content.clone()));
        }

        if self.pending.is_empty() && self.state == AssemblerState::AwaitingToolOutputs {
            self.state = AssemblerState::Collecting;
        }
        Ok(())
    }

    fn on_message(&mut self, text: String) {
        if text.trim().is_empty() {
            debug!("blank message ignored");
            return;
        }
        match self.message.as_mut() {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(&text);
            }
            None => self.message = Some(text),
        }
        self.state = AssemblerState::Finalizing;
    }

    fn record(&mut self, kind: EventKind) {
        let event = Event::new(self.events.len(), kind);
        debug!(seq = event.seq, kind = event.kind.label(), "event");
        if let Some(observer) = self.observer {
            observer(&event);
        }
        self.events.push(event);
    }

    /// Closes the current round.
    ///
    /// Returns [`RoundOutcome::FollowUp`] when client tools ran without an
    /// answer, otherwise finalizes the turn.
    pub fn end_round(&mut self) -> Result<RoundOutcome, AgentError> {
        if let Some((call_id, name)) = self.pending.iter().next() {
            return Err(AgentError::IncompleteToolCall {
                call_id: call_id.clone(),
                name: name.clone(),
            });
        }

        if self.message.is_none() && !self.round_entries.is_empty() {
            info!(
                round = self.rounds,
                tool_calls = self.round_entries.len() / 2,
                "tools executed without an answer, follow-up required"
            );
            self.state = AssemblerState::Collecting;
            return Ok(RoundOutcome::FollowUp {
                entries: std::mem::take(&mut self.round_entries),
            });
        }

        self.state = AssemblerState::Finalizing;
        self.finalize().map(RoundOutcome::Finished)
    }

    fn finalize(&mut self) -> Result<TurnResult, AgentError> {
        let (text, used_fallback) = if let Some(message) = self.message.take() {
            (message, false)
        } else if let Some(segment) = self.reasoning.last() {
            warn!(events = self.events.len(), "no message in stream, answering from reasoning");
            (answer_from_reasoning(segment), true)
        } else if let Some((tool, content)) = &self.last_success {
            warn!(tool = %tool, "no message or reasoning in stream, answering from tool output");
            (answer_from_tool_output(tool, content), true)
        } else {
            self.state = AssemblerState::Done;
            return Err(AgentError::EmptyResponse);
        };

        self.state = AssemblerState::Done;
        info!(rounds = self.rounds, events = self.events.len(), used_fallback, "turn assembled");
        Ok(TurnResult {
            text,
            events: std::mem::take(&mut self.events),
            used_fallback,
            rounds: self.rounds,
        })
    }
}

/// Picks the answer-like part of a reasoning segment.
///
/// The last paragraph that is long enough and is neither planning text nor a
/// JSON blob wins; otherwise the whole segment is used.
#[must_use]
pub fn answer_from_reasoning(segment: &str) -> String {
    let trimmed = segment.trim();
    let paragraphs: Vec<&str> = match PARAGRAPH_BREAK.as_ref() {
        Some(re) => re.split(trimmed).collect(),
        None => trimmed.split("\n\n").collect(),
    };

    paragraphs
        .into_iter()
        .rev()
        .map(str::trim)
        .find(|p| reads_like_answer(p))
        .unwrap_or(trimmed)
        .to_string()
}

fn reads_like_answer(paragraph: &str) -> bool {
    if paragraph.starts_with('{') || paragraph.chars().count() <= MIN_ANSWER_PARAGRAPH {
        return false;
    }
    PLANNING_PREFIX
        .as_ref()
        .is_none_or(|re| !re.is_match(paragraph))
}

/// Minimal answer citing a tool and an excerpt of what it returned.
#[must_use]
pub fn answer_from_tool_output(tool: &str, content: &str) -> String {
    let mut graphemes = content.trim().graphemes(true);
    let excerpt: String = graphemes.by_ref().take(TOOL_EXCERPT_LEN).collect();
    let ellipsis = if graphemes.next().is_some() { "..." } else { "" };
    format!("The `{tool}` tool completed successfully.\n\n{excerpt}{ellipsis}")
}
