//! Self-hosted AnythingLLM gateway provider
//!
//! The gateway exposes an OpenAI-shaped chat endpoint but frequently omits
//! usage data, in which case token counts are estimated and flagged. It has no
//! streaming support here, so the trait's single-delta fallback is used.

use crate::llm::provider::{
    Completion, CompletionRequest, LlmError, LlmProvider, ProviderId, TokenUsage,
};
use crate::llm::providers::openai::{OpenAiChatRequest, OpenAiChatResponse, OpenAiMessage};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// AnythingLLM gateway provider
pub struct GatewayProvider {
    config: GatewayConfig,
    client: Client,
}

impl GatewayProvider {
    pub fn new(config: GatewayConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::NotConfigured(
                "AnythingLLM base URL is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Gateway usage is trusted only when it reports non-zero counts
    fn resolve_usage(completion: Completion, request: &CompletionRequest) -> Completion {
        if completion.usage.estimated || completion.usage.total() > 0 {
            return completion;
        }
        Completion {
            usage: TokenUsage::estimate(&request.messages, &completion.content),
            ..completion
        }
    }
}

#[async_trait]
impl LlmProvider for GatewayProvider {
    fn id(&self) -> ProviderId {
        ProviderId::AnythingLlm
    }

    fn available_models(&self) -> Vec<String> {
        // Models are gateway workspaces; none are known ahead of time
        Vec::new()
    }

    async fn chat(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        debug!(model = %request.model, "sending gateway chat");

        let body = OpenAiChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: m.role.as_str().to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            stream_options: None,
        };

        let mut builder = self
            .client
            .post(self.endpoint("/api/v1/openai/chat/completions"))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::from_transport(ProviderId::AnythingLlm, &e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(
                ProviderId::AnythingLlm,
                status,
                &error_text,
            ));
        }

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let completion =
            crate::llm::providers::openai::OpenAiProvider::parse_completion(parsed, &request)?;
        Ok(Self::resolve_usage(completion, &request))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let mut builder = self.client.get(self.endpoint("/api/v1/auth"));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::from_transport(ProviderId::AnythingLlm, &e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::from_status(
                ProviderId::AnythingLlm,
                response.status(),
                "health check failed",
            ))
        }
    }
}
