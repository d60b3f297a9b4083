//! Mock implementations for testing
//!
//! Scripted provider adapters and failing collaborators, so router behavior
//! can be exercised without network access.

use crate::accounting::{
    InMemoryStore, PolicyStore, RunCompletion, RunLedger, RunStart, SpendCapStatus, StoreError,
};
use crate::cache::{CacheError, ResponseCache};
use crate::llm::provider::{
    Completion, CompletionRequest, LlmError, LlmProvider, ProviderId, ProviderStream,
    StreamEvent, TokenUsage,
};
use crate::policy::OrgPolicy;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Provider adapter that replays scripted outcomes
///
/// Each `chat` call pops the next scripted result; once the script is empty
/// it answers with `"<provider> response"` and 10/5 reported tokens.
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    stream_script: Mutex<Option<Vec<Result<StreamEvent, LlmError>>>>,
    delay: Option<Duration>,
    unhealthy_probe: bool,
    calls: AtomicU32,
    stream_calls: AtomicU32,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(None),
            delay: None,
            unhealthy_probe: false,
            calls: AtomicU32::new(0),
            stream_calls: AtomicU32::new(0),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.with_completion(Completion {
            content: content.into(),
            model: String::new(),
            usage: TokenUsage::reported(10, 5),
        })
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.script.get_mut().push_back(Ok(completion));
        self
    }

    pub fn with_error(mut self, error: LlmError) -> Self {
        self.script.get_mut().push_back(Err(error));
        self
    }

    /// Fail every call with the given error
    pub fn always_failing(id: ProviderId, error: LlmError) -> Self {
        let mut provider = Self::new(id);
        provider
            .script
            .get_mut()
            .extend(std::iter::repeat(Err(error)).take(64));
        provider
    }

    pub fn with_stream(mut self, events: Vec<Result<StreamEvent, LlmError>>) -> Self {
        *self.stream_script.get_mut() = Some(events);
        self
    }

    /// Wait before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_unhealthy_probe(mut self) -> Self {
        self.unhealthy_probe = true;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stream_call_count(&self) -> u32 {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn available_models(&self) -> Vec<String> {
        vec!["scripted-model".to_string()]
    }

    async fn chat(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.lock().await.pop_front() {
            Some(Ok(completion)) => Ok(Completion {
                model: if completion.model.is_empty() {
                    request.model
                } else {
                    completion.model
                },
                ..completion
            }),
            Some(Err(e)) => Err(e),
            None => Ok(Completion {
                content: format!("{} response", self.id),
                model: request.model,
                usage: TokenUsage::reported(10, 5),
            }),
        }
    }

    async fn stream_chat(&self, request: CompletionRequest) -> Result<ProviderStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let scripted = self.stream_script.lock().await.clone();
        match scripted {
            Some(events) => Ok(stream::iter(events).boxed()),
            None => {
                let completion = self.chat(request).await?;
                Ok(stream::iter(vec![
                    Ok(StreamEvent::Delta(completion.content)),
                    Ok(StreamEvent::Usage(completion.usage)),
                ])
                .boxed())
            }
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.unhealthy_probe {
            Err(LlmError::NetworkError("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Store wrapper that can be told to fail individual operations
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_policy: bool,
    pub fail_spend: bool,
    pub fail_start_run: bool,
    pub fail_complete_run: bool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_policy(&self, org_id: &str, policy: OrgPolicy) {
        self.inner.set_policy(org_id, policy);
    }

    pub fn set_spend(&self, org_id: &str, status: SpendCapStatus) {
        self.inner.set_spend(org_id, status);
    }

    fn unavailable() -> StoreError {
        StoreError::Request("store unavailable".to_string())
    }
}

#[async_trait]
impl PolicyStore for FlakyStore {
    async fn get_org_policy(&self, org_id: &str) -> Result<Option<OrgPolicy>, StoreError> {
        if self.fail_policy {
            return Err(Self::unavailable());
        }
        self.inner.get_org_policy(org_id).await
    }

    async fn check_spend_cap(&self, org_id: &str) -> Result<Option<SpendCapStatus>, StoreError> {
        if self.fail_spend {
            return Err(Self::unavailable());
        }
        self.inner.check_spend_cap(org_id).await
    }
}

#[async_trait]
impl RunLedger for FlakyStore {
    async fn start_run(&self, run: &RunStart) -> Result<String, StoreError> {
        if self.fail_start_run {
            return Err(Self::unavailable());
        }
        self.inner.start_run(run).await
    }

    async fn complete_run(&self, completion: &RunCompletion) -> Result<(), StoreError> {
        if self.fail_complete_run {
            return Err(Self::unavailable());
        }
        self.inner.complete_run(completion).await
    }
}

/// Cache whose every operation fails
#[derive(Debug, Default)]
pub struct FailingCache;

#[async_trait]
impl ResponseCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Connection("cache offline".to_string()))
    }

    async fn setex(&self, _key: &str, _ttl: Duration, _value: String) -> Result<(), CacheError> {
        Err(CacheError::Connection("cache offline".to_string()))
    }
}
