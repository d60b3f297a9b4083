//! Test helpers and utilities for integration tests

use llm_router::accounting::InMemoryStore;
use llm_router::llm::provider::{LlmProvider, Message, ProviderId};
use llm_router::registry::{ProviderConfig, ProviderRegistry};
use llm_router::retry::RetryPolicy;
use llm_router::router::{LlmRouter, RouterBuilder};
use llm_router::testing::mocks::ScriptedProvider;
use std::sync::Arc;
use std::time::Duration;

/// Registry over scripted adapters; cloud ids get a key, private ids a URL
#[allow(dead_code)]
pub fn registry(
    default_provider: ProviderId,
    private_provider: Option<ProviderId>,
    providers: Vec<Arc<ScriptedProvider>>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new(default_provider, private_provider);
    for provider in providers {
        let id = provider.id();
        let config = if id.is_private() {
            ProviderConfig::private(id, "http://localhost:8000/v1", &format!("{id}-model"))
        } else {
            ProviderConfig::cloud(id, "test-key", &format!("{id}-model"))
        };
        registry.register(config, provider);
    }
    registry
}

/// Builder with fast retries and the given in-memory store
#[allow(dead_code)]
pub fn builder(registry: ProviderRegistry, store: Arc<InMemoryStore>) -> RouterBuilder {
    LlmRouter::builder(registry)
        .store(store)
        .retry_policy(fast_retries(3))
}

/// Retry policy with millisecond delays and no jitter
#[allow(dead_code)]
pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_jitter: Duration::ZERO,
    }
}

#[allow(dead_code)]
pub fn user_message(text: &str) -> Vec<Message> {
    vec![Message::user(text)]
}
