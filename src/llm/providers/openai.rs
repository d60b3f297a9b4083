//! OpenAI-compatible provider implementation
//!
//! Speaks the `/chat/completions` wire format. The same adapter serves
//! OpenAI itself, Google's OpenAI-compatible endpoint and the self-hosted
//! vLLM and Ollama servers; only the provider id, base URL and credential
//! requirements differ.

use crate::llm::provider::{
    Completion, CompletionRequest, LlmError, LlmProvider, Message, ProviderId, ProviderStream,
    StreamEvent, TokenUsage,
};
use crate::llm::providers::sse;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub provider: ProviderId,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Default base URL for each OpenAI-compatible backend
    pub fn default_base_url(provider: ProviderId) -> &'static str {
        match provider {
            ProviderId::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderId::Vllm => "http://localhost:8000/v1",
            ProviderId::Ollama => "http://localhost:11434/v1",
            _ => "https://api.openai.com/v1",
        }
    }

    pub fn for_provider(provider: ProviderId) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: Self::default_base_url(provider).to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::for_provider(ProviderId::OpenAi)
    }
}

/// OpenAI-compatible provider implementation
#[derive(Debug)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new provider; cloud backends require an API key
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let has_key = config.api_key.as_deref().is_some_and(|k| !k.is_empty());
        if !config.provider.is_private() && !has_key {
            return Err(LlmError::NotConfigured(format!(
                "{} API key is required",
                config.provider
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAiChatRequest {
        // Google's compatibility layer rejects stream_options
        let stream_options = (stream && self.config.provider != ProviderId::Google)
            .then_some(OpenAiStreamOptions {
                include_usage: true,
            });

        OpenAiChatRequest {
            model: request.model.clone(),
            messages: Self::convert_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            stream_options,
        }
    }

    /// Parse a blocking completion response (pure function)
    pub(crate) fn parse_completion(
        response: OpenAiChatResponse,
        request: &CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices returned".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let usage = match response.usage {
            Some(usage) => TokenUsage::reported(usage.prompt_tokens, usage.completion_tokens),
            None => TokenUsage::estimate(&request.messages, &content),
        };

        Ok(Completion {
            content,
            model: response.model.unwrap_or_else(|| request.model.clone()),
            usage,
        })
    }

    async fn send(&self, body: &OpenAiChatRequest) -> Result<reqwest::Response, LlmError> {
        let provider = self.config.provider;
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(provider = %provider, "network error: {}", e);
            LlmError::from_transport(provider, &e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if error_text.contains("maximum context length") {
                warn!(provider = %provider, "token limit exceeded - conversation may be too long");
            }
            return Err(LlmError::from_status(provider, status, &error_text));
        }

        Ok(response)
    }
}

/// Accumulates streamed tool-call fragments keyed by their index
#[derive(Debug, Default)]
struct ToolCallAssembler {
    calls: BTreeMap<u32, (String, String)>,
}

impl ToolCallAssembler {
    fn push(&mut self, delta: &OpenAiToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.0.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                entry.1.push_str(arguments);
            }
        }
    }

    fn drain(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|(name, arguments)| StreamEvent::ToolCall {
                name,
                input: serde_json::from_str(&arguments)
                    .unwrap_or(serde_json::Value::String(arguments)),
            })
            .collect()
    }
}

/// Convert one streamed chunk into zero or more events (pure apart from the assembler)
fn chunk_events(chunk: OpenAiStreamChunk, tools: &mut ToolCallAssembler) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::Delta(content));
        }
        for call in choice.delta.tool_calls.iter().flatten() {
            tools.push(call);
        }
        if choice.finish_reason.is_some() {
            events.extend(tools.drain());
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(TokenUsage::reported(
            usage.prompt_tokens,
            usage.completion_tokens,
        )));
    }

    events
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        self.config.provider
    }

    fn available_models(&self) -> Vec<String> {
        let models: &[&str] = match self.config.provider {
            ProviderId::Google => &["gemini-1.5-pro", "gemini-1.5-flash"],
            ProviderId::Vllm => &["meta-llama/Llama-3.1-8B-Instruct"],
            ProviderId::Ollama => &["llama3.1", "qwen2.5"],
            _ => &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo"],
        };
        models.iter().map(|m| m.to_string()).collect()
    }

    async fn chat(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        debug!(
            provider = %self.config.provider,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion"
        );

        let body = self.build_request(&request, false);
        let response = self.send(&body).await?;
        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Self::parse_completion(parsed, &request)
    }

    async fn stream_chat(&self, request: CompletionRequest) -> Result<ProviderStream, LlmError> {
        let body = self.build_request(&request, true);
        let response = self.send(&body).await?;

        let events = sse::data_stream(self.config.provider, response)
            .scan(ToolCallAssembler::default(), |tools, payload| {
                let batch: Vec<Result<StreamEvent, LlmError>> = match payload {
                    Ok(data) => match serde_json::from_str::<OpenAiStreamChunk>(&data) {
                        Ok(chunk) => chunk_events(chunk, tools).into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(LlmError::InvalidResponse(format!(
                            "malformed stream chunk: {e}"
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
        let provider = self.config.provider;
        let mut builder = self
            .client
            .get(format!("{}/models", self.config.base_url));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::from_transport(provider, &e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(LlmError::from_status(provider, status, "health check failed"))
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiStreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OpenAiMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiChoice {
    pub message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
