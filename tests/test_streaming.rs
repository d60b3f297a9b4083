//! Streaming chat through the router

mod test_helpers;

use futures::StreamExt;
use llm_router::accounting::{InMemoryStore, RunStatus, SpendCapStatus};
use llm_router::llm::provider::{LlmError, ProviderId, StreamChunk, StreamEvent, TokenUsage};
use llm_router::policy::{DataClassification, Feature, RouterRequest};
use llm_router::router::{ChatOptions, LlmRouter};
use llm_router::testing::mocks::{FlakyStore, ScriptedProvider};
use serde_json::json;
use std::sync::Arc;
use test_helpers::{builder, registry, user_message};

fn chat_request() -> RouterRequest {
    RouterRequest::new("org-1", "user-1", Feature::Chat)
}

async fn collect(router: &LlmRouter, request: RouterRequest, text: &str) -> Vec<StreamChunk> {
    router
        .stream_chat(request, user_message(text), ChatOptions::default())
        .collect()
        .await
}

#[tokio::test]
async fn test_stream_relays_content_then_done_with_reported_usage() {
    let provider = Arc::new(ScriptedProvider::new(ProviderId::Anthropic).with_stream(vec![
        Ok(StreamEvent::Delta("Hel".to_string())),
        Ok(StreamEvent::Delta(String::new())),
        Ok(StreamEvent::Delta("lo".to_string())),
        Ok(StreamEvent::Usage(TokenUsage::reported(4, 2))),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let router = builder(
        registry(ProviderId::Anthropic, None, vec![provider.clone()]),
        Arc::clone(&store),
    )
    .build();

    let chunks = collect(&router, chat_request(), "hi").await;

    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks[0],
        StreamChunk::Content {
            content: "Hel".to_string()
        }
    );
    assert_eq!(
        chunks[1],
        StreamChunk::Content {
            content: "lo".to_string()
        }
    );
    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(
        chunks[2],
        StreamChunk::Done {
            run_id: runs[0].run_id.clone(),
            usage: TokenUsage::reported(4, 2),
        }
    );
    assert_eq!(runs[0].usage, Some(TokenUsage::reported(4, 2)));
    assert_eq!(provider.stream_call_count(), 1);

    let streams = router.metrics().snapshot().streams;
    assert_eq!((streams.started, streams.completed, streams.failed), (1, 1, 0));
}

#[tokio::test]
async fn test_stream_without_usage_is_estimated() {
    let provider = Arc::new(
        ScriptedProvider::new(ProviderId::Vllm)
            .with_stream(vec![Ok(StreamEvent::Delta("a fairly long answer".to_string()))]),
    );
    let router = builder(
        registry(ProviderId::Vllm, None, vec![provider]),
        Arc::new(InMemoryStore::new()),
    )
    .build();

    let chunks = collect(&router, chat_request(), "question").await;

    match chunks.last() {
        Some(StreamChunk::Done { usage, .. }) => {
            assert!(usage.estimated);
            assert!(usage.output_tokens > 0);
        }
        other => panic!("expected done chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_relays_tool_calls() {
    let provider = Arc::new(ScriptedProvider::new(ProviderId::OpenAi).with_stream(vec![
        Ok(StreamEvent::ToolCall {
            name: "lookup_entity".to_string(),
            input: json!({"name": "ACME"}),
        }),
        Ok(StreamEvent::Usage(TokenUsage::reported(8, 1))),
    ]));
    let router = builder(
        registry(ProviderId::OpenAi, None, vec![provider]),
        Arc::new(InMemoryStore::new()),
    )
    .build();

    let chunks = collect(&router, chat_request(), "who is ACME").await;

    assert_eq!(
        chunks[0],
        StreamChunk::ToolCall {
            tool_name: "lookup_entity".to_string(),
            tool_input: json!({"name": "ACME"}),
        }
    );
    assert!(matches!(chunks[1], StreamChunk::Done { .. }));
}

#[tokio::test]
async fn test_stream_spend_cap_yields_single_error() {
    let provider = Arc::new(ScriptedProvider::new(ProviderId::Anthropic));
    let store = Arc::new(InMemoryStore::new());
    store.set_spend(
        "org-1",
        SpendCapStatus {
            cap_reached: true,
            monthly_cap: Some(100.0),
            current_spend: Some(100.0),
            ..Default::default()
        },
    );
    let router = builder(
        registry(ProviderId::Anthropic, None, vec![provider.clone()]),
        Arc::clone(&store),
    )
    .build();

    let chunks = collect(&router, chat_request(), "hi").await;

    assert_eq!(
        chunks,
        vec![StreamChunk::Error {
            error: "Monthly spend cap of $100 reached. Current spend: $100".to_string()
        }]
    );
    assert_eq!(provider.stream_call_count(), 0);
    assert!(store.runs().is_empty());
}

#[tokio::test]
async fn test_stream_secret_without_private_provider() {
    let provider = Arc::new(ScriptedProvider::new(ProviderId::OpenAi));
    let router = builder(
        registry(ProviderId::OpenAi, None, vec![provider]),
        Arc::new(InMemoryStore::new()),
    )
    .build();

    let request = chat_request().with_classification(DataClassification::Secret);
    let chunks = collect(&router, request, "classified").await;

    assert_eq!(
        chunks,
        vec![StreamChunk::Error {
            error: "Configuration error: secret data requires private LLM but none configured"
                .to_string()
        }]
    );
}

#[tokio::test]
async fn test_stream_failure_mid_way_fails_run_without_failover() {
    let primary = Arc::new(ScriptedProvider::new(ProviderId::Anthropic).with_stream(vec![
        Ok(StreamEvent::Delta("partial".to_string())),
        Err(LlmError::ApiError("anthropic stream error: overloaded_error - Overloaded".into())),
    ]));
    let fallback = Arc::new(ScriptedProvider::new(ProviderId::OpenAi));
    let store = Arc::new(InMemoryStore::new());
    let router = builder(
        registry(ProviderId::Anthropic, None, vec![primary, fallback.clone()]),
        Arc::clone(&store),
    )
    .build();

    let chunks = collect(&router, chat_request(), "hi").await;

    assert_eq!(chunks.len(), 2);
    assert!(matches!(&chunks[0], StreamChunk::Content { content } if content == "partial"));
    match &chunks[1] {
        StreamChunk::Error { error } => assert!(error.contains("overloaded_error")),
        other => panic!("expected error chunk, got {other:?}"),
    }
    assert_eq!(fallback.stream_call_count(), 0);

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(router.metrics().snapshot().streams.failed, 1);
}

#[tokio::test]
async fn test_stream_run_start_failure_yields_error() {
    let provider = Arc::new(ScriptedProvider::new(ProviderId::Anthropic));
    let store = FlakyStore {
        fail_start_run: true,
        ..Default::default()
    };
    let router = builder(
        registry(ProviderId::Anthropic, None, vec![provider.clone()]),
        Arc::new(InMemoryStore::new()),
    )
    .store(Arc::new(store))
    .build();

    let chunks = collect(&router, chat_request(), "hi").await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error { error } => assert!(error.starts_with("Failed to start AI run")),
        other => panic!("expected error chunk, got {other:?}"),
    }
    assert_eq!(provider.stream_call_count(), 0);
}

#[tokio::test]
async fn test_stream_falls_back_to_blocking_chat() {
    let provider = Arc::new(ScriptedProvider::new(ProviderId::AnythingLlm).with_response("whole answer"));
    let router = builder(
        registry(ProviderId::AnythingLlm, None, vec![provider.clone()]),
        Arc::new(InMemoryStore::new()),
    )
    .build();

    let chunks = collect(&router, chat_request(), "hi").await;

    assert_eq!(
        chunks[0],
        StreamChunk::Content {
            content: "whole answer".to_string()
        }
    );
    assert!(matches!(
        &chunks[1],
        StreamChunk::Done { usage, .. } if *usage == TokenUsage::reported(10, 5)
    ));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_dropping_stream_early_cancels_run() {
    let events = (0..100)
        .map(|i| Ok(StreamEvent::Delta(format!("token-{i} "))))
        .collect();
    let provider = Arc::new(ScriptedProvider::new(ProviderId::Anthropic).with_stream(events));
    let store = Arc::new(InMemoryStore::new());
    let router = builder(
        registry(ProviderId::Anthropic, None, vec![provider]),
        Arc::clone(&store),
    )
    .build();

    let mut stream = router.stream_chat(
        chat_request(),
        user_message("long answer"),
        ChatOptions::default(),
    );
    assert_eq!(
        stream.next().await,
        Some(StreamChunk::Content {
            content: "token-0 ".to_string()
        })
    );
    drop(stream);

    let mut status = RunStatus::Running;
    for _ in 0..200 {
        if let Some(run) = store.runs().first() {
            status = run.status;
            if status != RunStatus::Running {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert_eq!(status, RunStatus::Cancelled);
    assert_eq!(store.runs().len(), 1);
    assert_eq!(
        store.runs()[0].error_message.as_deref(),
        Some("client disconnected")
    );
}
