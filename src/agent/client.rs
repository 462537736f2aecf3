//! Provider registry and factory.
//!
//! Maps provider names to concrete [`LlmProvider`] implementations.

use crate::agent::config::Settings;
use crate::agent::provider::LlmProvider;
use crate::agent::providers::VllmProvider;
use crate::error::AgentError;

/// Creates an [`LlmProvider`] based on the configured provider name.
///
/// # Supported Providers
///
/// - `"vllm"` (default): vLLM serving the Responses API
/// - `"openai"`: any other Responses-compatible endpoint, same transport
///
/// # Errors
///
/// Returns [`AgentError::UnsupportedProvider`] for unknown provider names and
/// [`AgentError::Configuration`] if the transport cannot be set up.
pub fn create_provider(settings: &Settings) -> Result<Box<dyn LlmProvider>, AgentError> {
    match settings.provider.as_str() {
        "vllm" | "openai" => Ok(Box::new(VllmProvider::new(settings)?)),
        other => Err(AgentError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}
