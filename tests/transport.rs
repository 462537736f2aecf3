//! End-to-end turns over HTTP against an in-process mock server.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use common::mock_server::{
    MockServer, Reply, function_call_item, message_item, reasoning_item,
};
use oss_agent::agent::{
    HealthStatus, LlmProvider, Settings, Tool, ToolDefinition, ToolRegistry, ToolSpec,
    TurnOrchestrator,
};
use oss_agent::agent::providers::VllmProvider;
use oss_agent::error::{AgentError, ToolError};

fn settings(base_url: &str, streaming: bool, max_retries: u32) -> Settings {
    Settings::builder()
        .base_url(base_url)
        .streaming(streaming)
        .max_retries(max_retries)
        .build()
        .unwrap_or_else(|_| unreachable!())
}

fn orchestrator(settings: Settings) -> TurnOrchestrator {
    let provider = VllmProvider::new(&settings).unwrap_or_else(|_| unreachable!());
    TurnOrchestrator::new(Arc::new(provider), settings)
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echo the given text".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    async fn execute(&self, args: &Value) -> Result<String, ToolError> {
        Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
    }
}

#[tokio::test]
async fn test_health_probe_strips_api_prefix() {
    let server = MockServer::start(Vec::new()).await;
    let provider = VllmProvider::new(&settings(&server.base_url(), false, 0))
        .unwrap_or_else(|_| unreachable!());

    assert!(provider.health_url().ends_with("/health"));
    assert!(!provider.health_url().contains("/v1"));
    assert_eq!(provider.probe_health().await, HealthStatus::Healthy);

    server.set_unhealthy();
    assert!(!provider.probe_health().await.is_healthy());
}

#[tokio::test]
async fn test_list_models() {
    let server = MockServer::start(Vec::new()).await;
    let provider = VllmProvider::new(&settings(&server.base_url(), false, 0))
        .unwrap_or_else(|_| unreachable!());

    let models = provider.list_models().await.unwrap_or_else(|_| unreachable!());
    assert_eq!(models, vec!["openai/gpt-oss-20b".to_string()]);
}

#[tokio::test]
async fn test_non_streaming_turn() {
    let server = MockServer::start(vec![Reply::Items(vec![
        reasoning_item("Simple arithmetic."),
        message_item("2 + 2 = 4"),
    ])])
    .await;
    let mut agent = orchestrator(settings(&server.base_url(), false, 0));

    let result = agent.run_turn("What is 2+2?").await.unwrap_or_else(|_| unreachable!());
    assert_eq!(result.text, "2 + 2 = 4");
    assert!(!result.used_fallback);
    assert_eq!(result.events.len(), 2);
    assert_eq!(agent.conversation().len(), 2);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["stream"], false);
    assert_eq!(requests[0]["input"][0]["content"], "What is 2+2?");
    assert!(requests[0].get("tools").is_none());
}

#[tokio::test]
async fn test_streaming_turn() {
    let server = MockServer::start(vec![Reply::Stream(vec![
        reasoning_item("Simple arithmetic."),
        message_item("4"),
    ])])
    .await;
    let mut agent = orchestrator(settings(&server.base_url(), true, 0));

    let result = agent.run_turn("What is 2+2?").await.unwrap_or_else(|_| unreachable!());
    assert_eq!(result.text, "4");
    assert_eq!(result.events.len(), 2);
    assert_eq!(server.requests()[0]["stream"], true);
}

#[tokio::test]
async fn test_streamed_turn_without_message_recovers_from_reasoning() {
    let answer = "The capital of Australia is Canberra, not Sydney as many people assume.";
    let server = MockServer::start(vec![Reply::Stream(vec![reasoning_item(&format!(
        "I need to recall the capital.\n\n{answer}"
    ))])])
    .await;
    let mut agent = orchestrator(settings(&server.base_url(), true, 0));

    let result = agent
        .run_turn("Capital of Australia?")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert!(result.used_fallback);
    assert_eq!(result.text, answer);
}

#[tokio::test]
async fn test_client_tool_round_trip() {
    let server = MockServer::start(vec![
        Reply::Items(vec![function_call_item("call_1", "echo", r#"{"text":"hi"}"#)]),
        Reply::Items(vec![message_item("The tool said HI.")]),
    ])
    .await;
    let settings = settings(&server.base_url(), false, 0);
    let provider = VllmProvider::new(&settings).unwrap_or_else(|_| unreachable!());
    let registry = ToolRegistry::from_specs([ToolSpec::new(Arc::new(EchoTool))]);
    let mut agent = TurnOrchestrator::with_registry(Arc::new(provider), settings, registry);

    let result = agent.run_turn("Echo hi").await.unwrap_or_else(|_| unreachable!());
    assert_eq!(result.text, "The tool said HI.");
    assert_eq!(result.rounds, 2);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["tools"][0]["name"], "echo");

    let follow_up = requests[1]["input"]
        .as_array()
        .unwrap_or_else(|| unreachable!());
    let output = follow_up
        .iter()
        .find(|item| item["type"] == "function_call_output")
        .unwrap_or_else(|| unreachable!());
    assert_eq!(output["call_id"], "call_1");
    assert_eq!(output["output"], "HI");
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start(vec![
        Reply::Status(503, "loading model".to_string()),
        Reply::Items(vec![message_item("ready now")]),
    ])
    .await;
    let mut agent = orchestrator(settings(&server.base_url(), false, 2));

    let result = agent.run_turn("hello").await.unwrap_or_else(|_| unreachable!());
    assert_eq!(result.text, "ready now");
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start(vec![Reply::Status(400, "bad request".to_string())]).await;
    let mut agent = orchestrator(settings(&server.base_url(), false, 3));

    let err = agent.run_turn("hello").await.err();
    assert!(matches!(err, Some(AgentError::ServerRejected { status: 400, .. })));
    assert_eq!(server.requests().len(), 1);
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn test_unreachable_server() {
    let mut agent = orchestrator(settings("http://127.0.0.1:1/v1", false, 0));

    let err = agent.run_turn("hello").await.err();
    assert!(matches!(err, Some(AgentError::Unreachable { attempts: 1, .. })));
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn test_empty_response_is_an_error() {
    let server = MockServer::start(vec![Reply::Items(Vec::new())]).await;
    let mut agent = orchestrator(settings(&server.base_url(), false, 0));

    let err = agent.run_turn("hello").await.err();
    assert_eq!(err, Some(AgentError::EmptyResponse));
    // The question stays, followed by a failure entry in place of an answer.
    assert_eq!(agent.conversation().len(), 2);
}
