//! Anthropic Messages API adapter.

mod stream;

use async_trait::async_trait;
use serde::Serialize;

use self::stream::AnthropicEventParser;
use crate::{
    config::AnthropicProviderConfig,
    providers::{
        ChatMessage, GenerationInput, Provider, ProviderError, ProviderEventStream,
        sse::{check_status, event_stream},
    },
};

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    api_version: String,
    max_tokens: u32,
    thinking_budget_tokens: u32,
}

impl AnthropicProvider {
    pub fn from_config(config: &AnthropicProviderConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            max_tokens: config.max_tokens,
            thinking_budget_tokens: config.thinking_budget_tokens,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    #[tracing::instrument(
        skip(self, client, input),
        fields(provider = "anthropic", model = %input.model, thinking = input.enable_thinking)
    )]
    async fn stream_generation(
        &self,
        client: &reqwest::Client,
        input: GenerationInput,
    ) -> Result<ProviderEventStream, ProviderError> {
        // Temperature is left unset: extended thinking requires the default.
        let request = AnthropicRequest {
            model: &input.model,
            max_tokens: self.max_tokens,
            system: input.system_prompt.as_deref(),
            messages: &input.messages,
            stream: true,
            thinking: input.enable_thinking.then_some(ThinkingConfig {
                kind: "enabled",
                budget_tokens: self.thinking_budget_tokens,
            }),
        };

        let response = client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(event_stream(response, AnthropicEventParser::default()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use futures::StreamExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;
    use crate::{
        pricing::TokenUsage,
        providers::{ProviderErrorKind, ProviderEvent},
    };

    fn provider(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::from_config(&AnthropicProviderConfig {
            api_key: "sk-ant-test".into(),
            base_url: server.uri(),
            api_version: "2023-06-01".into(),
            max_tokens: 1024,
            thinking_budget_tokens: 512,
            allowed_models: vec![],
            model_aliases: HashMap::new(),
        })
    }

    fn input(enable_thinking: bool) -> GenerationInput {
        GenerationInput {
            model: "claude-sonnet-4-5".into(),
            system_prompt: Some("Be kind.".into()),
            messages: vec![ChatMessage::user("Hello")],
            enable_thinking,
            metadata_sentinels: None,
        }
    }

    fn sse(events: &[&str]) -> String {
        events
            .iter()
            .map(|e| format!("event: x\ndata: {e}\n\n"))
            .collect()
    }

    #[tokio::test]
    async fn test_streams_thinking_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(serde_json::json!({
                "stream": true,
                "max_tokens": 1024,
                "system": "Be kind.",
                "thinking": {"type": "enabled", "budget_tokens": 512},
                "messages": [{"role": "user", "content": "Hello"}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse(&[
                        r#"{"type":"message_start","message":{"usage":{"input_tokens":9}}}"#,
                        r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Hmm"}}"#,
                        r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hi there"}}"#,
                        r#"{"type":"message_delta","delta":{},"usage":{"output_tokens":4}}"#,
                        r#"{"type":"message_stop"}"#,
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let events: Vec<_> = provider(&server)
            .stream_generation(&client, input(true))
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                ProviderEvent::Thinking("Hmm".into()),
                ProviderEvent::Text("Hi there".into()),
                ProviderEvent::Usage(TokenUsage::new(9, 4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_error_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "prompt is too long: 250000 tokens"}
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = match provider(&server).stream_generation(&client, input(false)).await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.kind(), ProviderErrorKind::ContextLengthExceeded);
    }

    #[tokio::test]
    async fn test_thinking_omitted_when_disabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(move |req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                assert!(body.get("thinking").is_none());
                ResponseTemplate::new(200).set_body_string(sse(&[r#"{"type":"message_stop"}"#]))
            })
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let events: Vec<_> = provider(&server)
            .stream_generation(&client, input(false))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(events.is_empty());
    }
}
