//! Anthropic Messages API stream events.

use serde::Deserialize;

use crate::{
    pricing::TokenUsage,
    providers::{ProviderError, ProviderEvent, sse::SseEventParser},
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        message: MessageStartData,
    },
    ContentBlockStart {},
    ContentBlockDelta {
        delta: ContentDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        #[serde(default)]
        usage: Option<MessageDeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicStreamError,
    },
}

#[derive(Debug, Deserialize)]
pub struct MessageStartData {
    #[serde(default)]
    pub usage: Option<MessageStartUsage>,
}

#[derive(Debug, Deserialize)]
pub struct MessageStartUsage {
    pub input_tokens: i64,
    /// Tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read_input_tokens: i64,
    /// Tokens written to the prompt cache.
    #[serde(default)]
    pub cache_creation_input_tokens: i64,
}

/// Note: variant names match Anthropic's wire format (text_delta, thinking_delta, ...).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::enum_variant_names)]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    SignatureDelta {},
    InputJsonDelta {},
}

#[derive(Debug, Deserialize)]
pub struct MessageDeltaUsage {
    pub output_tokens: i64,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicStreamError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Accumulates usage across `message_start` and `message_delta`.
#[derive(Debug, Default)]
pub struct AnthropicEventParser {
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    usage_emitted: bool,
}

impl AnthropicEventParser {
    fn usage_event(&mut self) -> Option<ProviderEvent> {
        if self.usage_emitted {
            return None;
        }
        let (input, output) = (self.input_tokens?, self.output_tokens?);
        self.usage_emitted = true;
        Some(ProviderEvent::Usage(TokenUsage::new(input, output)))
    }
}

impl SseEventParser for AnthropicEventParser {
    fn parse(&mut self, data: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
        let event: AnthropicStreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unrecognized Anthropic stream event");
                return Ok(Vec::new());
            }
        };

        let events = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    // Cached prompt tokens are still prompt tokens for billing.
                    self.input_tokens = Some(
                        usage.input_tokens
                            + usage.cache_read_input_tokens
                            + usage.cache_creation_input_tokens,
                    );
                }
                Vec::new()
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta {
                ContentDelta::TextDelta { text } if !text.is_empty() => {
                    vec![ProviderEvent::Text(text)]
                }
                ContentDelta::ThinkingDelta { thinking } if !thinking.is_empty() => {
                    vec![ProviderEvent::Thinking(thinking)]
                }
                _ => Vec::new(),
            },
            AnthropicStreamEvent::MessageDelta { usage } => {
                if let Some(usage) = usage {
                    self.output_tokens = Some(usage.output_tokens);
                }
                Vec::new()
            }
            AnthropicStreamEvent::MessageStop => self.usage_event().into_iter().collect(),
            AnthropicStreamEvent::Error { error } => {
                return Err(ProviderError::upstream(
                    None,
                    format!("{}: {}", error.error_type, error.message),
                ));
            }
            AnthropicStreamEvent::ContentBlockStart {}
            | AnthropicStreamEvent::ContentBlockStop {}
            | AnthropicStreamEvent::Ping => Vec::new(),
        };
        Ok(events)
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        self.usage_event().into_iter().collect()
    }
}
