//! OpenAI-compatible chat completions adapter.
//!
//! Works with OpenAI, OpenRouter, Ollama and anything else speaking the
//! `/chat/completions` streaming dialect.

use std::collections::HashMap;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::OpenAiProviderConfig,
    pricing::TokenUsage,
    providers::{
        ChatMessage, GenerationInput, Provider, ProviderError, ProviderEvent,
        ProviderEventStream,
        sse::{SseEventParser, check_status, event_stream},
    },
};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<OutboundMessage<'a>>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningOptions>,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ReasoningOptions {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek and vLLM style reasoning.
    #[serde(default)]
    reasoning_content: Option<String>,
    /// OpenRouter style reasoning.
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

#[derive(Debug, Default)]
struct ChatCompletionParser {
    usage: Option<TokenUsage>,
}

impl SseEventParser for ChatCompletionParser {
    fn parse(&mut self, data: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unparseable chat completion chunk");
                return Ok(Vec::new());
            }
        };

        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ProviderError::upstream(None, message));
        }

        let mut events = Vec::new();
        for delta in chunk.choices.into_iter().filter_map(|c| c.delta) {
            if let Some(thinking) = delta.reasoning_content.or(delta.reasoning)
                && !thinking.is_empty()
            {
                events.push(ProviderEvent::Thinking(thinking));
            }
            if let Some(text) = delta.content
                && !text.is_empty()
            {
                events.push(ProviderEvent::Text(text));
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(TokenUsage::new(usage.prompt_tokens, usage.completion_tokens));
        }

        Ok(events)
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        self.usage.take().map(ProviderEvent::Usage).into_iter().collect()
    }
}

pub struct OpenAICompatibleProvider {
    api_key: Option<String>,
    base_url: String,
    headers: HashMap<String, String>,
}

impl OpenAICompatibleProvider {
    pub fn from_config(config: &OpenAiProviderConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: config.headers.clone(),
        }
    }
}

fn outbound_messages<'a>(
    system_prompt: Option<&'a str>,
    messages: &'a [ChatMessage],
) -> Vec<OutboundMessage<'a>> {
    system_prompt
        .map(|content| OutboundMessage {
            role: "system",
            content,
        })
        .into_iter()
        .chain(messages.iter().map(|m| OutboundMessage {
            role: m.role.as_str(),
            content: &m.content,
        }))
        .collect()
}

#[async_trait]
impl Provider for OpenAICompatibleProvider {
    fn name(&self) -> &'static str {
        "open_ai"
    }

    #[tracing::instrument(
        skip(self, client, input),
        fields(provider = "open_ai", model = %input.model, thinking = input.enable_thinking)
    )]
    async fn stream_generation(
        &self,
        client: &reqwest::Client,
        input: GenerationInput,
    ) -> Result<ProviderEventStream, ProviderError> {
        let request = ChatCompletionRequest {
            model: &input.model,
            messages: outbound_messages(input.system_prompt.as_deref(), &input.messages),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            reasoning: input
                .enable_thinking
                .then_some(ReasoningOptions { enabled: true }),
        };

        let mut req = client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(api_key) = &self.api_key {
            req = req.header(AUTHORIZATION, format!("Bearer {}", api_key));
        }
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }

        let response = check_status(req.send().await?).await?;
        Ok(event_stream(response, ChatCompletionParser::default()))
    }
}
