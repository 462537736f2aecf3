//! Turn orchestrator.
//!
//! Owns the conversation and drives one turn at a time: send the
//! conversation and tool catalog, feed the returned events to a
//! [`ResponseAssembler`], and loop while the assembler asks for a follow-up
//! round. It is the only component that mutates the conversation and the
//! only one that decides how a failed turn is recorded.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::assembler::{ResponseAssembler, RoundOutcome};
use super::config::Settings;
use super::event::{EventObserver, TurnResult};
use super::executor::ToolExecutor;
use super::message::{Conversation, ConversationEntry};
use super::prompt::build_instructions;
use super::provider::{LlmProvider, TurnRequest};
use super::tool::{ToolRegistry, build_registry};
use crate::error::AgentError;

/// Snapshot of a session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Provider name.
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Base URL of the inference server.
    pub base_url: String,
    /// Whether responses are streamed.
    pub streaming: bool,
    /// Registered tool names.
    pub tools: Vec<String>,
    /// Completed or attempted turns still in the conversation.
    pub turns: usize,
}

/// Drives turns against one provider with one tool catalog.
pub struct TurnOrchestrator {
    provider: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    settings: Settings,
    instructions: String,
    conversation: Conversation,
    observer: Option<EventObserver>,
}

impl TurnOrchestrator {
    /// Creates an orchestrator whose tool catalog is built from `settings`.
    pub fn new(provider: Arc<dyn LlmProvider>, settings: Settings) -> Self {
        let registry = build_registry(&settings);
        Self::with_registry(provider, settings, registry)
    }

    /// Creates an orchestrator with an explicit tool catalog.
    pub fn with_registry(
        provider: Arc<dyn LlmProvider>,
        settings: Settings,
        registry: ToolRegistry,
    ) -> Self {
        let instructions =
            build_instructions(settings.instructions.as_deref(), &registry.definitions());
        Self {
            provider,
            registry,
            settings,
            instructions,
            conversation: Conversation::new(),
            observer: None,
        }
    }

    /// Registers a callback that sees every event as it is processed.
    #[must_use]
    pub fn with_observer(mut self, observer: EventObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The provider in use.
    #[must_use]
    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    /// The session's tool catalog.
    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Session settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Instructions sent with every request.
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Read-only view of the conversation.
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Session summary.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            provider: self.provider.name().to_string(),
            model: self.settings.model.clone(),
            base_url: self.settings.base_url.clone(),
            streaming: self.settings.streaming,
            tools: self.registry.names().into_iter().map(String::from).collect(),
            turns: self.conversation.turn_count(),
        }
    }

    /// Forgets the conversation. The tool catalog is kept.
    pub fn clear(&mut self) {
        self.conversation.clear();
        info!("conversation cleared");
    }

    /// Runs one turn to completion.
    ///
    /// On success the answer is appended to the conversation. A
    /// connectivity failure removes every trace of the turn. Any other
    /// failure keeps the user input and records a failure entry in place of
    /// an answer.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::EmptyInput`] for blank input, and otherwise the
    /// error that ended the turn.
    pub async fn run_turn(&mut self, input: &str) -> Result<TurnResult, AgentError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AgentError::EmptyInput);
        }

        let start = Instant::now();
        let checkpoint = self.conversation.len();
        self.conversation.push(ConversationEntry::user(input));

        let Self {
            provider,
            registry,
            settings,
            instructions,
            conversation,
            observer,
        } = &mut *self;

        let deadline = settings.turn_timeout;
        let outcome = tokio::time::timeout(
            deadline,
            drive_turn(
                provider.as_ref(),
                registry,
                settings,
                instructions,
                conversation,
                observer.as_ref(),
            ),
        )
        .await
        .unwrap_or(Err(AgentError::TurnTimeout {
            secs: deadline.as_secs(),
        }));

        match outcome {
            Ok(result) => {
                self.conversation
                    .push(ConversationEntry::assistant(result.text.clone()));
                info!(
                    rounds = result.rounds,
                    used_fallback = result.used_fallback,
                    elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "turn complete"
                );
                Ok(result)
            }
            Err(err) if err.is_connectivity() => {
                warn!(error = %err, "turn failed before a usable response, rolling back");
                self.conversation.truncate(checkpoint);
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "turn abandoned");
                self.conversation.truncate(checkpoint + 1);
                self.conversation.push(ConversationEntry::Failure {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

async fn drive_turn(
    provider: &dyn LlmProvider,
    registry: &ToolRegistry,
    settings: &Settings,
    instructions: &str,
    conversation: &mut Conversation,
    observer: Option<&EventObserver>,
) -> Result<TurnResult, AgentError> {
    let tools = registry.definitions();
    // Every follow-up needs a round that ran client tools, and those rounds
    // are capped, so the loop is bounded.
    let mut assembler = ResponseAssembler::new(ToolExecutor::new(registry))
        .with_observer(observer)
        .with_tool_round_limit(settings.max_tool_rounds);

    loop {
        assembler.begin_round();
        let request = TurnRequest {
            model: &settings.model,
            instructions,
            conversation: &*conversation,
            tools: &tools,
        };
        let stream = provider.send_turn(&request, settings.streaming).await?;
        assembler.consume(stream).await?;

        match assembler.end_round()? {
            RoundOutcome::Finished(result) => return Ok(result),
            RoundOutcome::FollowUp { entries } => conversation.extend(entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::{Value, json};

    use super::*;
    use crate::agent::event::{Event, EventKind, EventStream};
    use crate::agent::provider::HealthStatus;
    use crate::agent::tool::{Tool, ToolCall, ToolDefinition, ToolOrigin, ToolOutput, ToolSpec};
    use crate::error::ToolError;

    /// Replays one scripted response per call; the last script repeats.
    struct ScriptedProvider {
        scripts: Vec<Result<Vec<EventKind>, AgentError>>,
        calls: AtomicUsize,
        seen_entries: Mutex<Vec<usize>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Result<Vec<EventKind>, AgentError>>) -> Self {
            Self {
                scripts,
                calls: AtomicUsize::new(0),
                seen_entries: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn probe_health(&self) -> HealthStatus {
            HealthStatus::Healthy
        }

        async fn send_turn(
            &self,
            request: &TurnRequest<'_>,
            _streaming: bool,
        ) -> Result<EventStream, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen_entries.lock() {
                seen.push(request.conversation.len());
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let script = self.scripts[n.min(self.scripts.len() - 1)].clone()?;
            let events: Vec<Result<Event, AgentError>> = script
                .into_iter()
                .enumerate()
                .map(|(i, k)| Ok(Event::new(i, k)))
                .collect();
            Ok(Box::pin(stream::iter(events)))
        }

        async fn list_models(&self) -> Result<Vec<String>, AgentError> {
            Ok(vec!["scripted-model".to_string()])
        }
    }

    #[derive(Default)]
    struct LookupTool {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for LookupTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "lookup".to_string(),
                description: "Looks things up".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _args: &Value) -> Result<String, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok("lookup result".to_string())
        }
    }

    fn settings(max_tool_rounds: usize) -> Settings {
        Settings::builder()
            .max_tool_rounds(max_tool_rounds)
            .build()
            .unwrap_or_else(|_| unreachable!())
    }

    fn message(text: &str) -> EventKind {
        EventKind::Message {
            text: text.to_string(),
        }
    }

    fn client_call(id: &str) -> EventKind {
        EventKind::ToolCall(ToolCall {
            id: id.to_string(),
            name: "lookup".to_string(),
            arguments: "{}".to_string(),
            origin: ToolOrigin::Client,
        })
    }

    fn orchestrator(provider: ScriptedProvider) -> (TurnOrchestrator, Arc<ScriptedProvider>) {
        let (orch, provider, _) = limited_orchestrator(provider, 2);
        (orch, provider)
    }

    /// Also returns how many times the lookup tool ran.
    fn limited_orchestrator(
        provider: ScriptedProvider,
        max_tool_rounds: usize,
    ) -> (TurnOrchestrator, Arc<ScriptedProvider>, Arc<AtomicUsize>) {
        let provider = Arc::new(provider);
        let tool = LookupTool::default();
        let runs = Arc::clone(&tool.runs);
        let registry = ToolRegistry::from_specs([ToolSpec::new(Arc::new(tool))]);
        let orch = TurnOrchestrator::with_registry(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            settings(max_tool_rounds),
            registry,
        );
        (orch, provider, runs)
    }

    #[tokio::test]
    async fn test_simple_turn() {
        let (mut orch, provider) = orchestrator(ScriptedProvider::new(vec![Ok(vec![message("4")])]));
        let result = orch
            .run_turn("What is 2+2?")
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(result.text, "4");
        assert!(!result.used_fallback);
        assert_eq!(
            orch.conversation().entries(),
            &[
                ConversationEntry::user("What is 2+2?"),
                ConversationEntry::assistant("4"),
            ]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follow_up_round_after_client_tool() {
        let (mut orch, provider) = orchestrator(ScriptedProvider::new(vec![
            Ok(vec![client_call("c1")]),
            Ok(vec![message("Found it.")]),
        ]));
        let result = orch
            .run_turn("look it up")
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(result.text, "Found it.");
        assert_eq!(result.rounds, 2);

        let entries = orch.conversation().entries();
        assert_eq!(entries.len(), 4);
        assert!(matches!(&entries[2], ConversationEntry::ToolOutput(o) if o.content == "lookup result"));
        // the second request carried the call and its output
        let seen = provider.seen_entries.lock().map(|s| s.clone()).unwrap_or_default();
        assert_eq!(seen, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_tool_loop_exceeded_records_failure() {
        let (mut orch, provider, runs) = limited_orchestrator(
            ScriptedProvider::new(vec![Ok(vec![client_call("again")])]),
            2,
        );
        let err = orch.run_turn("loop forever").await;
        assert_eq!(err, Err(AgentError::ToolLoopExceeded { max_rounds: 2 }));
        // the third response asks for tools again; it is refused, not run
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let entries = orch.conversation().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ConversationEntry::user("loop forever"));
        assert!(matches!(&entries[1], ConversationEntry::Failure { .. }));
    }

    #[tokio::test]
    async fn test_single_tool_round_runs_only_once() {
        let (mut orch, provider, runs) = limited_orchestrator(
            ScriptedProvider::new(vec![
                Ok(vec![client_call("a")]),
                Ok(vec![client_call("b")]),
                Ok(vec![message("never reached")]),
            ]),
            1,
        );
        let err = orch.run_turn("look twice").await;
        assert_eq!(err, Err(AgentError::ToolLoopExceeded { max_rounds: 1 }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_tool_round_still_gets_an_answer() {
        let (mut orch, _, runs) = limited_orchestrator(
            ScriptedProvider::new(vec![
                Ok(vec![client_call("a")]),
                Ok(vec![message("Here it is.")]),
            ]),
            1,
        );
        let result = orch
            .run_turn("look once")
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(result.text, "Here it is.");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_output_answers_when_follow_up_is_empty() {
        let (mut orch, provider, runs) = limited_orchestrator(
            ScriptedProvider::new(vec![Ok(vec![client_call("c1")]), Ok(vec![])]),
            2,
        );
        let result = orch
            .run_turn("look it up")
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(result.used_fallback);
        assert_eq!(result.rounds, 2);
        assert!(result.text.starts_with("The `lookup` tool completed successfully."));
        assert!(result.text.contains("lookup result"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            orch.conversation().entries().last(),
            Some(&ConversationEntry::assistant(result.text.clone()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_rolls_back() {
        let (mut orch, _) = orchestrator(ScriptedProvider::new(vec![
            Ok(vec![message("first")]),
            Err(AgentError::Unreachable {
                endpoint: "http://localhost:8000/v1/responses".to_string(),
                attempts: 4,
                reason: "connection refused".to_string(),
            }),
        ]));
        orch.run_turn("one").await.unwrap_or_else(|_| unreachable!());
        let err = orch.run_turn("two").await;
        assert!(matches!(err, Err(AgentError::Unreachable { .. })));
        assert_eq!(orch.conversation().len(), 2);
        assert_eq!(orch.info().turns, 1);
    }

    #[tokio::test]
    async fn test_empty_response_is_distinct_from_unreachable() {
        let (mut orch, _) = orchestrator(ScriptedProvider::new(vec![Ok(vec![])]));
        let err = orch.run_turn("hello").await;
        assert_eq!(err, Err(AgentError::EmptyResponse));
        assert_eq!(orch.conversation().len(), 2);
    }

    #[tokio::test]
    async fn test_orphan_output_aborts_turn() {
        let (mut orch, _) = orchestrator(ScriptedProvider::new(vec![Ok(vec![
            EventKind::ToolCall(ToolCall {
                id: "1".to_string(),
                name: "web_search".to_string(),
                arguments: "{}".to_string(),
                origin: ToolOrigin::Server,
            }),
            EventKind::ToolOutput(ToolOutput::success("2", "stray")),
        ])]));
        let err = orch.run_turn("search").await;
        assert!(matches!(err, Err(AgentError::OrphanToolOutput { .. })));
    }

    #[tokio::test]
    async fn test_turn_timeout() {
        let mut provider = ScriptedProvider::new(vec![Ok(vec![message("late")])]);
        provider.delay = Some(Duration::from_secs(5));
        let provider = Arc::new(provider);
        let settings = Settings::builder()
            .turn_timeout(Duration::from_millis(20))
            .build()
            .unwrap_or_else(|_| unreachable!());
        let mut orch = TurnOrchestrator::with_registry(
            provider as Arc<dyn LlmProvider>,
            settings,
            ToolRegistry::none(),
        );

        let err = orch.run_turn("hello").await;
        assert!(matches!(err, Err(AgentError::TurnTimeout { .. })));
        assert!(orch.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (mut orch, provider) = orchestrator(ScriptedProvider::new(vec![Ok(vec![message("x")])]));
        assert_eq!(orch.run_turn("   ").await, Err(AgentError::EmptyInput));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(orch.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_info_and_clear() {
        let (mut orch, _) = orchestrator(ScriptedProvider::new(vec![Ok(vec![message("hi")])]));
        orch.run_turn("hello").await.unwrap_or_else(|_| unreachable!());

        let info = orch.info();
        assert_eq!(info.provider, "scripted");
        assert_eq!(info.tools, vec!["lookup".to_string()]);
        assert_eq!(info.turns, 1);
        assert!(orch.instructions().contains("- lookup: Looks things up"));

        orch.clear();
        assert_eq!(orch.info().turns, 0);
        assert_eq!(orch.registry().len(), 1);
    }
}
