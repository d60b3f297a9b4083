//! Provider adapter tests against mocked HTTP backends

use futures::StreamExt;
use llm_router::llm::provider::{
    CompletionRequest, LlmError, LlmProvider, Message, ProviderId, StreamEvent, TokenUsage,
};
use llm_router::llm::providers::{
    AnthropicConfig, AnthropicProvider, GatewayConfig, GatewayProvider, OpenAiConfig,
    OpenAiProvider,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(model: &str) -> CompletionRequest {
    CompletionRequest {
        messages: vec![
            Message::system("Be brief."),
            Message::user("What is the capital of Oman?"),
        ],
        model: model.to_string(),
        temperature: 0.3,
        max_tokens: 256,
    }
}

fn openai(server: &MockServer, provider: ProviderId) -> OpenAiProvider {
    OpenAiProvider::new(OpenAiConfig {
        provider,
        api_key: Some("test-key".to_string()),
        base_url: format!("{}/v1", server.uri()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn anthropic(server: &MockServer) -> AnthropicProvider {
    AnthropicProvider::new(AnthropicConfig {
        api_key: "test-key".to_string(),
        base_url: format!("{}/v1", server.uri()),
        ..Default::default()
    })
    .unwrap()
}

fn sse(events: &[serde_json::Value], done: bool) -> String {
    let mut body: String = events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect();
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

async fn collect(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
) -> Vec<Result<StreamEvent, LlmError>> {
    provider
        .stream_chat(request)
        .await
        .unwrap()
        .collect::<Vec<_>>()
        .await
}

#[test]
fn test_cloud_adapters_require_api_key() {
    let err = OpenAiProvider::new(OpenAiConfig::for_provider(ProviderId::OpenAi)).unwrap_err();
    assert!(matches!(err, LlmError::NotConfigured(_)));

    assert!(OpenAiProvider::new(OpenAiConfig::for_provider(ProviderId::Ollama)).is_ok());
    assert!(AnthropicProvider::new(AnthropicConfig::default()).is_err());
}

#[tokio::test]
async fn test_openai_chat_sends_bearer_and_parses_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "max_tokens": 256,
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "What is the capital of Oman?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": "Muscat."}}],
            "usage": {"prompt_tokens": 21, "completion_tokens": 3}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = openai(&server, ProviderId::OpenAi)
        .chat(request("gpt-4o"))
        .await
        .unwrap();

    assert_eq!(completion.content, "Muscat.");
    assert_eq!(completion.model, "gpt-4o-2024-08-06");
    assert_eq!(completion.usage, TokenUsage::reported(21, 3));
}

#[tokio::test]
async fn test_openai_chat_without_usage_is_estimated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Muscat is the capital."}}]
        })))
        .mount(&server)
        .await;

    let completion = openai(&server, ProviderId::Vllm)
        .chat(request("llama"))
        .await
        .unwrap();

    assert!(completion.usage.estimated);
    assert!(completion.usage.output_tokens > 0);
    assert_eq!(completion.model, "llama");
}

#[tokio::test]
async fn test_openai_status_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let provider = openai(&server, ProviderId::OpenAi);

    match provider.chat(request("gpt-4o")).await {
        Err(LlmError::RateLimitExceeded(message)) => assert!(message.contains("slow down")),
        other => panic!("expected rate limit, got {other:?}"),
    }
    match provider.chat(request("gpt-4o")).await {
        Err(LlmError::AuthenticationFailed(message)) => assert!(message.contains("401")),
        other => panic!("expected auth failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_openai_stream_yields_deltas_and_usage() {
    let server = MockServer::start().await;
    let body = sse(
        &[
            json!({"choices": [{"delta": {"content": "Mus"}}]}),
            json!({"choices": [{"delta": {"content": "cat."}, "finish_reason": "stop"}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 21, "completion_tokens": 3}}),
        ],
        true,
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = openai(&server, ProviderId::OpenAi);
    let events: Vec<StreamEvent> = collect(&provider, request("gpt-4o"))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("Mus".to_string()),
            StreamEvent::Delta("cat.".to_string()),
            StreamEvent::Usage(TokenUsage::reported(21, 3)),
        ]
    );
}

#[tokio::test]
async fn test_openai_stream_assembles_tool_calls() {
    let server = MockServer::start().await;
    let body = sse(
        &[
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"name": "lookup", "arguments": "{\"city\":"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"Muscat\"}"}}
            ]}, "finish_reason": "tool_calls"}]}),
        ],
        true,
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = openai(&server, ProviderId::OpenAi);
    let events = collect(&provider, request("gpt-4o")).await;

    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].as_ref().unwrap(),
        &StreamEvent::ToolCall {
            name: "lookup".to_string(),
            input: json!({"city": "Muscat"}),
        }
    );
}

#[tokio::test]
async fn test_openai_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    assert!(openai(&server, ProviderId::OpenAi).health_check().await.is_ok());

    let down = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&down)
        .await;
    assert!(openai(&down, ProviderId::OpenAi).health_check().await.is_err());
}

#[tokio::test]
async fn test_anthropic_chat_lifts_system_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "What is the capital of Oman?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "text", "text": "Mus"},
                {"type": "text", "text": "cat."}
            ],
            "usage": {"input_tokens": 18, "output_tokens": 4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = anthropic(&server)
        .chat(request("claude-3-5-sonnet-20241022"))
        .await
        .unwrap();

    assert_eq!(completion.content, "Muscat.");
    assert_eq!(completion.usage, TokenUsage::reported(18, 4));
}

#[tokio::test]
async fn test_anthropic_stream_reports_usage_from_start_and_delta() {
    let server = MockServer::start().await;
    let body = sse(
        &[
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 18}}}),
            json!({"type": "content_block_start", "index": 0}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Muscat."}}),
            json!({"type": "message_delta", "usage": {"output_tokens": 4}}),
            json!({"type": "message_stop"}),
        ],
        false,
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = anthropic(&server);
    let events: Vec<StreamEvent> = collect(&provider, request("claude-3-5-sonnet-20241022"))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("Muscat.".to_string()),
            StreamEvent::Usage(TokenUsage::reported(18, 4)),
        ]
    );
}

#[tokio::test]
async fn test_anthropic_stream_error_event_surfaces() {
    let server = MockServer::start().await;
    let body = sse(
        &[json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})],
        false,
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = anthropic(&server);
    let events = collect(&provider, request("claude-3-5-sonnet-20241022")).await;

    match &events[0] {
        Err(LlmError::ApiError(message)) => assert!(message.contains("overloaded_error")),
        other => panic!("expected stream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_gateway_estimates_missing_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/openai/chat/completions"))
        .and(header("authorization", "Bearer gateway-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "research",
            "choices": [{"message": {"role": "assistant", "content": "Muscat is the capital of Oman."}}],
            "usage": {"prompt_tokens": 0, "completion_tokens": 0}
        })))
        .mount(&server)
        .await;

    let provider = GatewayProvider::new(GatewayConfig {
        base_url: server.uri(),
        api_key: Some("gateway-key".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let completion = provider.chat(request("research")).await.unwrap();

    assert_eq!(completion.content, "Muscat is the capital of Oman.");
    assert!(completion.usage.estimated);
    assert_eq!(
        completion.usage,
        TokenUsage::estimate(&request("research").messages, &completion.content)
    );
}

#[tokio::test]
async fn test_gateway_health_check_uses_auth_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"authenticated": true})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GatewayProvider::new(GatewayConfig {
        base_url: format!("{}/", server.uri()),
        api_key: None,
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    assert!(provider.health_check().await.is_ok());
}
