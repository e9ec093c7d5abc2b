//! # Provider Implementations
//!
//! Every backend turns a [`GenerationInput`] into a stream of
//! [`ProviderEvent`]s. Adapters only translate wire formats; credit checks,
//! metadata stripping and settlement all live above this layer.
//!
//! All adapters receive a shared `&reqwest::Client`. The client is created
//! once at startup and maintains per-host connection pools internally.

pub mod anthropic;
pub mod error;
pub(crate) mod open_ai;
pub mod sse;
pub mod test;

use std::{collections::HashMap, pin::Pin, sync::Arc};

use async_trait::async_trait;
pub use error::{ProviderError, ProviderErrorKind};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::{
    config::{ProviderConfig, ProvidersConfig},
    pricing::TokenUsage,
};

/// A single normalized event from an upstream model.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Visible answer text.
    Text(String),
    /// Reasoning trace text.
    Thinking(String),
    /// Final token counts. Emitted at most once, at the end of the stream.
    Usage(TokenUsage),
}

pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Everything an adapter needs to open one generation stream.
#[derive(Debug, Clone)]
pub struct GenerationInput {
    /// Upstream model name, already resolved through aliases.
    pub model: String,
    pub system_prompt: Option<String>,
    /// Prior turns followed by the current user message.
    pub messages: Vec<ChatMessage>,
    pub enable_thinking: bool,
    /// Sentinel pair the model was instructed to wrap metadata in. Only the
    /// scripted provider reads this; real models follow the system prompt.
    pub metadata_sentinels: Option<(String, String)>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Open a streaming generation.
    ///
    /// Errors returned here happen before any event was produced; errors
    /// inside the stream happen after.
    async fn stream_generation(
        &self,
        client: &reqwest::Client,
        input: GenerationInput,
    ) -> Result<ProviderEventStream, ProviderError>;
}

/// A provider chosen for one model.
#[derive(Clone)]
pub struct ResolvedProvider {
    /// Configured provider name.
    pub name: String,
    pub provider: Arc<dyn Provider>,
    /// Upstream model name to send.
    pub upstream_model: String,
}

impl std::fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("upstream_model", &self.upstream_model)
            .finish()
    }
}

/// Instantiated providers keyed by configured name.
pub struct ProviderRegistry {
    config: ProvidersConfig,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|(name, provider_config)| {
                let provider: Arc<dyn Provider> = match provider_config {
                    ProviderConfig::OpenAi(c) => {
                        Arc::new(open_ai::OpenAICompatibleProvider::from_config(c))
                    }
                    ProviderConfig::Anthropic(c) => {
                        Arc::new(anthropic::AnthropicProvider::from_config(c))
                    }
                    ProviderConfig::Test(c) => Arc::new(test::TestProvider::from_config(c)),
                };
                (name.clone(), provider)
            })
            .collect();

        Self {
            config: config.clone(),
            providers,
        }
    }

    /// Route a gateway model id to its provider and upstream model name.
    pub fn resolve(&self, model: &str) -> Option<ResolvedProvider> {
        let (name, provider_config) = self.config.provider_for_model(model)?;
        let provider = self.providers.get(name)?;
        Some(ResolvedProvider {
            name: name.to_string(),
            provider: provider.clone(),
            upstream_model: provider_config.upstream_model(model).to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
