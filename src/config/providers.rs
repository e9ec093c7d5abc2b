//! Provider configuration module.
//!
//! Providers are configured with custom names and specify their API type.
//! A model is routed to the first provider listing it in `allowed_models`,
//! falling back to `default_provider`.
//!
//! # Example
//!
//! ```toml
//! [providers]
//! default_provider = "openrouter"
//!
//! [providers.openrouter]
//! type = "open_ai"
//! api_key = "${OPENROUTER_API_KEY}"
//! base_url = "https://openrouter.ai/api/v1"
//!
//! [providers.anthropic-direct]
//! type = "anthropic"
//! api_key = "${ANTHROPIC_API_KEY}"
//! allowed_models = ["claude-sonnet-4-5"]
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Provider configurations container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Provider used for models no provider explicitly lists.
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Provider configurations keyed by unique name.
    #[serde(flatten)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl ProvidersConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(default) = &self.default_provider
            && !self.providers.contains_key(default)
        {
            return Err(ConfigError::Validation(format!(
                "default_provider '{}' is not defined in providers",
                default
            )));
        }

        for (name, config) in &self.providers {
            config
                .validate()
                .map_err(|e| ConfigError::Validation(format!("provider '{}': {}", name, e)))?;
        }

        Ok(())
    }

    /// Check if any providers are configured.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Get a provider by name.
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Resolve the provider serving `model`.
    ///
    /// Explicit `allowed_models` listings win over the default provider. When
    /// several providers list the same model, the lexicographically first name
    /// is used so routing stays deterministic.
    pub fn provider_for_model(&self, model: &str) -> Option<(&str, &ProviderConfig)> {
        let mut listed: Vec<(&str, &ProviderConfig)> = self
            .providers
            .iter()
            .filter(|(_, config)| config.allowed_models().iter().any(|m| m == model))
            .map(|(name, config)| (name.as_str(), config))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(b.0));

        if let Some(first) = listed.into_iter().next() {
            return Some(first);
        }

        self.default_provider.as_deref().and_then(|name| {
            self.providers
                .get_key_value(name)
                .map(|(name, config)| (name.as_str(), config))
        })
    }
}

/// Provider type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Test,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "open_ai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Test => "test",
        }
    }
}

/// Configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// OpenAI or any OpenAI-compatible chat completions API.
    OpenAi(OpenAiProviderConfig),
    /// Anthropic Messages API.
    Anthropic(AnthropicProviderConfig),
    /// Scripted provider for tests and local development.
    Test(TestProviderConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::OpenAi(_) => ProviderType::OpenAi,
            Self::Anthropic(_) => ProviderType::Anthropic,
            Self::Test(_) => ProviderType::Test,
        }
    }

    pub fn allowed_models(&self) -> &[String] {
        match self {
            Self::OpenAi(c) => &c.allowed_models,
            Self::Anthropic(c) => &c.allowed_models,
            Self::Test(c) => &c.allowed_models,
        }
    }

    /// Upstream model name for a gateway model id.
    pub fn upstream_model<'a>(&'a self, model: &'a str) -> &'a str {
        let aliases = match self {
            Self::OpenAi(c) => &c.model_aliases,
            Self::Anthropic(c) => &c.model_aliases,
            Self::Test(c) => &c.model_aliases,
        };
        aliases.get(model).map(String::as_str).unwrap_or(model)
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::OpenAi(c) => c.validate(),
            Self::Anthropic(c) => c.validate(),
            Self::Test(_) => Ok(()),
        }
    }
}

/// OpenAI-compatible provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiProviderConfig {
    /// API key. Optional for local servers like Ollama.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL for the API.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Models served by this provider.
    #[serde(default)]
    pub allowed_models: Vec<String>,

    /// Gateway model id to upstream model name.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,

    /// Custom headers to include in requests.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl OpenAiProviderConfig {
    fn validate(&self) -> Result<(), String> {
        if self.base_url.is_empty() {
            return Err("base_url cannot be empty".into());
        }
        Ok(())
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".into()
}

/// Anthropic provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicProviderConfig {
    /// API key (required).
    pub api_key: String,

    /// Base URL override.
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    /// `anthropic-version` header value.
    #[serde(default = "default_anthropic_version")]
    pub api_version: String,

    /// `max_tokens` sent with every request. The Messages API requires it.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token budget for extended thinking when a request enables it.
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget_tokens: u32,

    /// Models served by this provider.
    #[serde(default)]
    pub allowed_models: Vec<String>,

    /// Gateway model id to upstream model name.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
}

impl AnthropicProviderConfig {
    fn validate(&self) -> Result<(), String> {
        if self.api_key.is_empty() {
            return Err("api_key cannot be empty".into());
        }
        if self.thinking_budget_tokens >= self.max_tokens {
            return Err("thinking_budget_tokens must be less than max_tokens".into());
        }
        Ok(())
    }
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".into()
}

fn default_anthropic_version() -> String {
    "2023-06-01".into()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_thinking_budget() -> u32 {
    4096
}

/// Failure simulation for the test provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestFailureMode {
    /// Normal operation (default).
    #[default]
    None,

    /// Fail before any event with an upstream-style HTTP error.
    HttpError {
        status_code: u16,
        #[serde(default)]
        message: Option<String>,
    },

    /// Emit `after_chunks` text chunks, then fail with the given message.
    MidStreamError {
        after_chunks: usize,
        #[serde(default = "default_mid_stream_message")]
        message: String,
    },

    /// Emit `after_chunks` text chunks, then go silent forever.
    Stall { after_chunks: usize },

    /// Complete the text but never report token usage.
    OmitUsage,
}

fn default_mid_stream_message() -> String {
    "upstream connection reset".into()
}

/// Test provider configuration.
///
/// A scripted provider that streams a fixed response without network calls.
///
/// ```toml
/// [providers.scripted]
/// type = "test"
/// response = "Fractions are parts of a whole."
/// thinking = "The user asks about fractions."
/// failure_mode = { type = "mid_stream_error", after_chunks = 3 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestProviderConfig {
    /// Visible answer text.
    #[serde(default = "default_test_response")]
    pub response: String,

    /// Thinking trace emitted before the answer.
    #[serde(default)]
    pub thinking: Option<String>,

    /// Raw supervision metadata appended to the answer, between sentinels,
    /// whenever the request asks for it.
    #[serde(default)]
    pub supervision_metadata: Option<String>,

    /// Characters per emitted text chunk.
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    /// Delay between chunks in milliseconds.
    #[serde(default)]
    pub chunk_delay_ms: u64,

    /// Failure simulation.
    #[serde(default)]
    pub failure_mode: TestFailureMode,

    /// Models served by this provider.
    #[serde(default)]
    pub allowed_models: Vec<String>,

    /// Gateway model id to upstream model name.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,
}

impl Default for TestProviderConfig {
    fn default() -> Self {
        Self {
            response: default_test_response(),
            thinking: None,
            supervision_metadata: None,
            chunk_chars: default_chunk_chars(),
            chunk_delay_ms: 0,
            failure_mode: TestFailureMode::None,
            allowed_models: Vec::new(),
            model_aliases: HashMap::new(),
        }
    }
}

fn default_test_response() -> String {
    "This is a test response from the gateway.".into()
}

fn default_chunk_chars() -> usize {
    8
}
