//! Session settings with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.
//! Only [`SettingsBuilder::from_env`] touches the process environment; the
//! transport, registry and orchestrator receive a finished [`Settings`].

use std::time::Duration;

use crate::error::AgentError;

/// Default inference server base URL (API prefix included).
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";
/// Default model identifier.
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b";
/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default health probe timeout in seconds.
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;
/// Default max retries for transient transport failures.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default maximum tool-execution rounds per turn.
const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
/// Default overall turn deadline in seconds.
const DEFAULT_TURN_TIMEOUT_SECS: u64 = 300;
/// Default number of web search results.
const DEFAULT_SEARCH_RESULTS: u8 = 5;
/// Value shipped in sample `.env` files; treated as "no key".
const PLACEHOLDER_EXA_KEY: &str = "your_exa_api_key_here";

/// Settings for one agent session.
#[derive(Clone)]
pub struct Settings {
    /// Provider name (`"vllm"` or `"openai"`, both OpenAI-compatible).
    pub provider: String,
    /// Base URL including the API prefix, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Optional bearer credential. Local servers need none.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Timeout for a single health probe.
    pub health_timeout: Duration,
    /// Retries for transient transport failures (attempts = retries + 1).
    pub max_retries: u32,
    /// Stream events instead of waiting for the full response.
    pub streaming: bool,
    /// Maximum tool-execution rounds per turn.
    pub max_tool_rounds: usize,
    /// Overall deadline for one turn, retries and tool calls included.
    pub turn_timeout: Duration,
    /// Custom system instructions; `None` uses the built-in default.
    pub instructions: Option<String>,
    /// Master switch for all optional tools.
    pub enable_tools: bool,
    /// Exa API key for the web search tools.
    pub exa_api_key: Option<String>,
    /// Whether the web search tools may be registered.
    pub web_search_enabled: bool,
    /// Default number of web search results (1..=10).
    pub web_search_max_results: u8,
}

impl Settings {
    /// Creates a new builder for `Settings`.
    #[must_use]
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Creates settings from environment variables with defaults.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }

    /// Whether the web search capability has everything it needs.
    #[must_use]
    pub fn web_search_configured(&self) -> bool {
        self.enable_tools
            && self.web_search_enabled
            && self
                .exa_api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty() && k != PLACEHOLDER_EXA_KEY)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("streaming", &self.streaming)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("turn_timeout", &self.turn_timeout)
            .field("enable_tools", &self.enable_tools)
            .field("exa_api_key", &self.exa_api_key.as_ref().map(|_| "<redacted>"))
            .field("web_search_enabled", &self.web_search_enabled)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Settings`].
#[derive(Clone, Default)]
pub struct SettingsBuilder {
    provider: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout: Option<Duration>,
    health_timeout: Option<Duration>,
    max_retries: Option<u32>,
    streaming: Option<bool>,
    max_tool_rounds: Option<usize>,
    turn_timeout: Option<Duration>,
    instructions: Option<String>,
    enable_tools: Option<bool>,
    exa_api_key: Option<String>,
    web_search_enabled: Option<bool>,
    web_search_max_results: Option<u8>,
}

impl std::fmt::Debug for SettingsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsBuilder")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("health_timeout", &self.health_timeout)
            .field("max_retries", &self.max_retries)
            .field("streaming", &self.streaming)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("turn_timeout", &self.turn_timeout)
            .field("enable_tools", &self.enable_tools)
            .field("exa_api_key", &self.exa_api_key.as_ref().map(|_| "<redacted>"))
            .field("web_search_enabled", &self.web_search_enabled)
            .finish_non_exhaustive()
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl SettingsBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("AGENT_PROVIDER").ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("VLLM_BASE_URL").ok();
        }
        if self.model.is_none() {
            self.model = std::env::var("DEFAULT_MODEL").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("VLLM_API_KEY").ok();
        }
        if self.timeout.is_none() {
            self.timeout = std::env::var("VLLM_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.max_retries.is_none() {
            self.max_retries = std::env::var("VLLM_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.streaming.is_none() {
            self.streaming = env_flag("AGENT_STREAMING");
        }
        if self.max_tool_rounds.is_none() {
            self.max_tool_rounds = std::env::var("AGENT_MAX_TOOL_ROUNDS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.instructions.is_none() {
            self.instructions = std::env::var("AGENT_INSTRUCTIONS").ok();
        }
        if self.exa_api_key.is_none() {
            self.exa_api_key = std::env::var("EXA_API_KEY").ok();
        }
        if self.web_search_enabled.is_none() {
            self.web_search_enabled = env_flag("EXA_ENABLED");
        }
        self
    }

    /// Sets the provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the base URL (API prefix included).
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the bearer credential.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the health probe timeout.
    #[must_use]
    pub const fn health_timeout(mut self, duration: Duration) -> Self {
        self.health_timeout = Some(duration);
        self
    }

    /// Sets the max retries.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Enables or disables streaming.
    #[must_use]
    pub const fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = Some(enabled);
        self
    }

    /// Sets the maximum tool-execution rounds per turn.
    #[must_use]
    pub const fn max_tool_rounds(mut self, n: usize) -> Self {
        self.max_tool_rounds = Some(n);
        self
    }

    /// Sets the overall turn deadline.
    #[must_use]
    pub const fn turn_timeout(mut self, duration: Duration) -> Self {
        self.turn_timeout = Some(duration);
        self
    }

    /// Overrides the system instructions.
    #[must_use]
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    /// Enables or disables all optional tools.
    #[must_use]
    pub const fn enable_tools(mut self, enabled: bool) -> Self {
        self.enable_tools = Some(enabled);
        self
    }

    /// Sets the Exa API key.
    #[must_use]
    pub fn exa_api_key(mut self, key: impl Into<String>) -> Self {
        self.exa_api_key = Some(key.into());
        self
    }

    /// Enables or disables the web search tools.
    #[must_use]
    pub const fn web_search_enabled(mut self, enabled: bool) -> Self {
        self.web_search_enabled = Some(enabled);
        self
    }

    /// Sets the default number of web search results.
    #[must_use]
    pub const fn web_search_max_results(mut self, n: u8) -> Self {
        self.web_search_max_results = Some(n);
        self
    }

    /// Builds the [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Configuration`] if the base URL is not an
    /// http(s) URL, or a timeout or round limit is zero.
    pub fn build(self) -> Result<Settings, AgentError> {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let parsed = reqwest::Url::parse(&base_url).map_err(|e| AgentError::Configuration {
            message: format!("invalid base URL '{base_url}': {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AgentError::Configuration {
                message: format!("base URL must use http or https, got '{}'", parsed.scheme()),
            });
        }

        let timeout = self
            .timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let turn_timeout = self
            .turn_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TURN_TIMEOUT_SECS));
        if timeout.is_zero() || turn_timeout.is_zero() {
            return Err(AgentError::Configuration {
                message: "timeouts must be greater than zero".to_string(),
            });
        }

        let max_tool_rounds = self.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS);
        if max_tool_rounds == 0 {
            return Err(AgentError::Configuration {
                message: "max_tool_rounds must be at least 1".to_string(),
            });
        }

        let web_search_max_results = self
            .web_search_max_results
            .unwrap_or(DEFAULT_SEARCH_RESULTS)
            .clamp(1, 10);

        Ok(Settings {
            provider: self.provider.unwrap_or_else(|| "vllm".to_string()),
            base_url,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: self.api_key.filter(|k| !k.is_empty()),
            timeout,
            health_timeout: self
                .health_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            streaming: self.streaming.unwrap_or(false),
            max_tool_rounds,
            turn_timeout,
            instructions: self.instructions.filter(|s| !s.trim().is_empty()),
            enable_tools: self.enable_tools.unwrap_or(true),
            exa_api_key: self.exa_api_key,
            web_search_enabled: self.web_search_enabled.unwrap_or(true),
            web_search_max_results,
        })
    }
}
