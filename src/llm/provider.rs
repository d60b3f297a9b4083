//! LLM provider abstraction and trait definitions
//!
//! This module defines the core traits and types shared by every backend
//! adapter, so the router can select a provider by id and drive it through
//! one uniform chat/stream interface.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Temperature used when the caller does not supply one
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Completion budget used when the caller does not supply one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Known backend providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Vllm,
    Ollama,
    #[serde(rename = "anythingllm")]
    AnythingLlm,
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Google,
        ProviderId::Vllm,
        ProviderId::Ollama,
        ProviderId::AnythingLlm,
    ];

    /// Self-hosted providers, in the order they are tried as private routes
    pub const PRIVATE: [ProviderId; 3] =
        [ProviderId::Vllm, ProviderId::Ollama, ProviderId::AnythingLlm];

    /// Cloud providers, in fallback preference order
    pub const CLOUD_FALLBACK_ORDER: [ProviderId; 3] =
        [ProviderId::Anthropic, ProviderId::OpenAi, ProviderId::Google];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Google => "google",
            ProviderId::Vllm => "vllm",
            ProviderId::Ollama => "ollama",
            ProviderId::AnythingLlm => "anythingllm",
        }
    }

    /// Whether data sent to this provider stays on infrastructure the organization controls
    pub fn is_private(&self) -> bool {
        Self::PRIVATE.contains(self)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LlmError::NotConfigured(format!("unknown provider '{s}'")))
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Message roles in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Request handed to an adapter once provider and model are decided
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token usage statistics
///
/// `estimated` is set when the backend did not report usage and the counts
/// were derived from character length instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub estimated: bool,
}

impl TokenUsage {
    pub fn reported(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            estimated: false,
        }
    }

    /// Character-length estimate (~4 characters per token) for backends without usage data
    pub fn estimate(messages: &[Message], output: &str) -> Self {
        Self {
            input_tokens: messages.iter().map(|m| estimate_tokens(&m.content)).sum(),
            output_tokens: estimate_tokens(output),
            estimated: true,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Rough token count for a text: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

/// Adapter-level completion result, before run accounting is attached
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Final response handed back to callers; serialized into the dedup cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub provider: ProviderId,
    pub model: String,
    pub run_id: String,
    #[serde(default)]
    pub tokens_estimated: bool,
}

impl LlmResponse {
    pub fn from_completion(completion: Completion, provider: ProviderId, run_id: &str) -> Self {
        Self {
            content: completion.content,
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            provider,
            model: completion.model,
            run_id: run_id.to_string(),
            tokens_estimated: completion.usage.estimated,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            estimated: self.tokens_estimated,
        }
    }
}

/// Raw event produced by an adapter's stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    Usage(TokenUsage),
}

/// Lazy, finite, non-restartable sequence of adapter events
pub type ProviderStream = BoxStream<'static, Result<StreamEvent, LlmError>>;

/// Chunk emitted to streaming callers
///
/// A well-formed stream is zero or more `Content`/`ToolCall` chunks followed
/// by exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content {
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_name: String,
        tool_input: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        run_id: String,
        usage: TokenUsage,
    },
    Error {
        error: String,
    },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done { .. } | StreamChunk::Error { .. })
    }
}

/// LLM provider trait for dependency injection and testing
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Which backend this adapter talks to
    fn id(&self) -> ProviderId;

    /// Get the provider name (e.g., "openai", "anthropic")
    fn name(&self) -> &str {
        self.id().as_str()
    }

    /// Get list of available models for this provider
    fn available_models(&self) -> Vec<String>;

    /// Generate a complete response
    async fn chat(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Stream a response
    ///
    /// Backends without native streaming issue one blocking call and emit its
    /// full content as a single delta followed by its usage.
    async fn stream_chat(&self, request: CompletionRequest) -> Result<ProviderStream, LlmError> {
        let completion = self.chat(request).await?;
        let events = vec![
            Ok(StreamEvent::Delta(completion.content)),
            Ok(StreamEvent::Usage(completion.usage)),
        ];
        Ok(stream::iter(events).boxed())
    }

    /// Check if the provider is configured and reachable
    async fn health_check(&self) -> Result<(), LlmError>;
}

/// LLM provider errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Rate limit exceeded (429): {0}")]
    RateLimitExceeded(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("API error: {0}")]
    ApiError(String),
}

impl LlmError {
    /// Map a reqwest transport failure, keeping timeout and connect errors recognisable
    pub fn from_transport(provider: ProviderId, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            LlmError::Timeout(format!("{provider}: {error}"))
        } else if error.is_connect() {
            LlmError::NetworkError(format!("{provider}: connection refused: {error}"))
        } else {
            LlmError::NetworkError(format!("{provider}: {error}"))
        }
    }

    /// Map a non-success HTTP status into an error carrying the status code
    pub fn from_status(provider: ProviderId, status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => {
                LlmError::AuthenticationFailed(format!("{provider} API error: {status} - {body}"))
            }
            429 => LlmError::RateLimitExceeded(format!("{provider} API error: {status} - {body}")),
            _ => LlmError::ApiError(format!("{provider} API error: {status} - {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_stream_chunk_wire_format() {
        let tool_call = StreamChunk::ToolCall {
            tool_name: "lookup_entity".to_string(),
            tool_input: serde_json::json!({"name": "ACME"}),
        };
        assert_eq!(
            serde_json::to_value(&tool_call).unwrap(),
            serde_json::json!({
                "type": "tool_call",
                "toolName": "lookup_entity",
                "toolInput": {"name": "ACME"}
            })
        );

        let done = serde_json::to_value(StreamChunk::Done {
            run_id: "run-1".to_string(),
            usage: TokenUsage::reported(3, 2),
        })
        .unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["runId"], "run-1");

        let parsed: StreamChunk = serde_json::from_value(serde_json::json!({
            "type": "content",
            "content": "hi"
        }))
        .unwrap();
        assert_eq!(
            parsed,
            StreamChunk::Content {
                content: "hi".to_string()
            }
        );
    }

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn id(&self) -> ProviderId {
            ProviderId::AnythingLlm
        }

        fn available_models(&self) -> Vec<String> {
            vec!["echo".to_string()]
        }

        async fn chat(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
            let content = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(Completion {
                usage: TokenUsage::estimate(&request.messages, &content),
                content,
                model: request.model,
            })
        }

        async fn health_check(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    #[test]
    fn test_provider_id_round_trip_names() {
        for id in ProviderId::ALL {
            assert_eq!(id.as_str().parse::<ProviderId>().unwrap(), id);
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
        assert!("mistral".parse::<ProviderId>().is_err());
    }

    #[test]
    fn test_private_providers() {
        assert!(ProviderId::Vllm.is_private());
        assert!(ProviderId::Ollama.is_private());
        assert!(ProviderId::AnythingLlm.is_private());
        assert!(!ProviderId::OpenAi.is_private());
        assert!(!ProviderId::Anthropic.is_private());
        assert!(!ProviderId::Google.is_private());
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimated_usage_is_flagged() {
        let usage = TokenUsage::estimate(&[Message::user("12345678")], "1234");
        assert_eq!(usage.input_tokens, 2);
        assert_eq!(usage.output_tokens, 1);
        assert!(usage.estimated);
        assert!(!TokenUsage::reported(1, 1).estimated);
    }

    #[test]
    fn test_stream_chunk_serialization_is_tagged() {
        let chunk = StreamChunk::Content {
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["content"], "hi");

        let done = StreamChunk::Done {
            run_id: "run-1".to_string(),
            usage: TokenUsage::default(),
        };
        assert!(done.is_terminal());
        assert!(!chunk.is_terminal());
    }

    #[test]
    fn test_status_mapping_keeps_code_in_message() {
        let err = LlmError::from_status(
            ProviderId::OpenAi,
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            "overloaded",
        );
        assert!(err.to_string().contains("503"));
        assert!(matches!(
            LlmError::from_status(ProviderId::OpenAi, reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            LlmError::from_status(ProviderId::Anthropic, reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::AuthenticationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_default_stream_degrades_to_single_delta() {
        let provider = EchoProvider;
        let request = CompletionRequest {
            messages: vec![Message::user("hello there")],
            model: "echo".to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        let events: Vec<_> = provider
            .stream_chat(request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Delta("hello there".to_string())
        );
        assert!(matches!(events[1], Ok(StreamEvent::Usage(u)) if u.estimated));
    }

    #[test]
    fn test_message_role_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageRole::System).unwrap(),
            "\"system\""
        );
        assert_eq!(serde_json::to_string(&MessageRole::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
    }
}
