//! Anthropic provider implementation
//!
//! This module provides Anthropic Messages API integration, including the
//! event-stream variant used for streaming chat.

use crate::llm::provider::{
    Completion, CompletionRequest, LlmError, LlmProvider, Message, MessageRole, ProviderId,
    ProviderStream, StreamEvent, TokenUsage,
};
use crate::llm::providers::sse;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Anthropic provider configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub version: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            timeout: Duration::from_secs(120),
            version: "2023-06-01".to_string(),
        }
    }
}

/// Anthropic provider implementation
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "Anthropic API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Split out the system prompt; Anthropic takes it as a top-level field
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let system = messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.clone());

        let chat = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();

        (system, chat)
    }

    fn build_request(request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let (system, messages) = Self::convert_messages(&request.messages);
        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system,
            temperature: Some(request.temperature),
            stream,
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(ProviderId::Anthropic, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(
                ProviderId::Anthropic,
                status,
                &error_text,
            ));
        }

        Ok(response)
    }
}

/// Tracks usage across the event stream; input tokens arrive first, output tokens last
#[derive(Debug, Default)]
struct StreamUsage {
    input_tokens: u32,
}

/// Convert one stream event into zero or more provider events (pure apart from usage state)
fn stream_events(event: AnthropicStreamEvent, usage: &mut StreamUsage) -> Vec<Result<StreamEvent, LlmError>> {
    match event {
        AnthropicStreamEvent::MessageStart { message } => {
            usage.input_tokens = message.usage.input_tokens;
            Vec::new()
        }
        AnthropicStreamEvent::ContentBlockDelta { delta } => match delta {
            AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                vec![Ok(StreamEvent::Delta(text))]
            }
            _ => Vec::new(),
        },
        AnthropicStreamEvent::MessageDelta { usage: delta_usage } => delta_usage
            .map(|u| {
                vec![Ok(StreamEvent::Usage(TokenUsage::reported(
                    usage.input_tokens,
                    u.output_tokens,
                )))]
            })
            .unwrap_or_default(),
        AnthropicStreamEvent::Error { error } => {
            vec![Err(LlmError::ApiError(format!(
                "anthropic stream error: {} - {}",
                error.error_type, error.message
            )))]
        }
        AnthropicStreamEvent::Other => Vec::new(),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn available_models(&self) -> Vec<String> {
        vec![
            "claude-3-5-sonnet-20241022".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
            "claude-3-opus-20240229".to_string(),
        ]
    }

    async fn chat(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        debug!(model = %request.model, messages = request.messages.len(), "sending anthropic message");

        let body = Self::build_request(&request, false);
        let response = self.send(&body).await?;
        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(Completion {
            content,
            model: anthropic_response.model,
            usage: TokenUsage::reported(
                anthropic_response.usage.input_tokens,
                anthropic_response.usage.output_tokens,
            ),
        })
    }

    async fn stream_chat(&self, request: CompletionRequest) -> Result<ProviderStream, LlmError> {
        let body = Self::build_request(&request, true);
        let response = self.send(&body).await?;

        let events = sse::data_stream(ProviderId::Anthropic, response)
            .scan(StreamUsage::default(), |usage, payload| {
                let batch = match payload {
                    Ok(data) => match serde_json::from_str::<AnthropicStreamEvent>(&data) {
                        Ok(event) => stream_events(event, usage),
                        Err(e) => vec![Err(LlmError::InvalidResponse(format!(
                            "malformed stream event: {e}"
                        )))],
                    },
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(stream::iter(batch)))
            })
            .flatten();

        Ok(events.boxed())
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(ProviderId::Anthropic, &e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::from_status(
                ProviderId::Anthropic,
                response.status(),
                "health check failed",
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicStreamMessage,
    },
    ContentBlockDelta {
        delta: AnthropicDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamMessage {
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
