//! Transport client contract.
//!
//! Implementations handle the wire protocol (HTTP, retries, streaming) for
//! one inference backend and hand the orchestrator a uniform [`EventStream`].
//! They never touch conversation state.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::event::EventStream;
use super::message::Conversation;
use super::tool::ToolDefinition;
use crate::error::AgentError;

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The server answered with a 2xx status.
    Healthy,
    /// The server could not be reached or answered with an error.
    Unreachable {
        /// Why the probe failed.
        reason: String,
    },
}

impl HealthStatus {
    /// Whether the probe succeeded.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Everything one request needs.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    /// Model identifier.
    pub model: &'a str,
    /// System instructions.
    pub instructions: &'a str,
    /// Conversation so far, including the current user input.
    pub conversation: &'a Conversation,
    /// Tool catalog.
    pub tools: &'a [ToolDefinition],
}

/// Trait for inference backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"vllm"`).
    fn name(&self) -> &'static str;

    /// Issues a liveness check against the server's health path.
    async fn probe_health(&self) -> HealthStatus;

    /// Sends one request and returns its events.
    ///
    /// With `streaming = false` the events are fully materialized before
    /// this returns; otherwise they are yielded as they arrive.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unreachable`] once retries are exhausted,
    /// [`AgentError::ServerRejected`] on a 4xx response, and
    /// [`AgentError::ResponseParse`] if a non-streaming body cannot be read.
    async fn send_turn(
        &self,
        request: &TurnRequest<'_>,
        streaming: bool,
    ) -> Result<EventStream, AgentError>;

    /// Lists the model identifiers the server offers.
    async fn list_models(&self) -> Result<Vec<String>, AgentError>;
}

/// Polls [`LlmProvider::probe_health`] until the server is healthy.
///
/// # Errors
///
/// Returns [`AgentError::Unreachable`] if `max_wait` elapses first.
pub async fn wait_for_server(
    provider: &dyn LlmProvider,
    max_wait: Duration,
    interval: Duration,
) -> Result<(), AgentError> {
    let deadline = Instant::now() + max_wait;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let reason = match provider.probe_health().await {
            HealthStatus::Healthy => {
                info!(provider = provider.name(), attempts, "server is ready");
                return Ok(());
            }
            HealthStatus::Unreachable { reason } => reason,
        };

        let now = Instant::now();
        if now >= deadline {
            return Err(AgentError::Unreachable {
                endpoint: format!("{} health check", provider.name()),
                attempts,
                reason,
            });
        }
        debug!(attempts, reason = %reason, "server not ready, waiting");
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
