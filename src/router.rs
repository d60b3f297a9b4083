//! LLM router
//!
//! Composes spend enforcement, deduplication, policy-driven provider
//! selection, run accounting, retries, failover and timeout budgets into the
//! two calls applications make: `chat` and `stream_chat`.
//!
//! All mutable routing state (provider health, in-flight requests, metrics)
//! is owned by one `LlmRouter` instance; clones share it.

use crate::accounting::{
    spend_cap_reason, InMemoryStore, PolicyStore, RunCompletion, RunLedger, RunStart, SpendCheck,
};
use crate::cache::{self, InMemoryCache, ResponseCache};
use crate::config::{DedupSection, RouterConfig, TimeoutSection};
use crate::dedup::{dedup_enabled, fingerprint, DedupSource, Deduplicator};
use crate::error::{sanitize_error_message, RouterError, RouterResult};
use crate::health::{self, HealthCheckResult, HealthTracker};
use crate::llm::provider::{
    Completion, CompletionRequest, LlmError, LlmProvider, LlmResponse, Message, MessageRole,
    ProviderId, StreamChunk, StreamEvent, TokenUsage, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use crate::observability::logging::{provider_span, request_span};
use crate::observability::metrics::RouterMetrics;
use crate::policy::{PolicyResolver, ProviderSelection, RouterRequest};
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::rpc::RpcStore;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn, Instrument};

/// Chunks buffered between the stream feeder and a slow consumer
const STREAM_BUFFER: usize = 32;

/// Stand-in deadline for budgets too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `budget` from now, saturating instead of overflowing the clock
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Per-call sampling options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Bypass the response cache and in-flight join
    pub skip_dedup: bool,
}

impl ChatOptions {
    fn completion_request(&self, messages: &[Message], model: &str) -> CompletionRequest {
        CompletionRequest {
            messages: messages.to_vec(),
            model: model.to_string(),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

struct RouterInner {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    resolver: PolicyResolver,
    store: Arc<dyn PolicyStore>,
    ledger: Arc<dyn RunLedger>,
    dedup: Deduplicator,
    retry: RetryPolicy,
    timeouts: TimeoutSection,
    metrics: RouterMetrics,
    failover: bool,
}

/// Policy-driven router over the registered provider adapters
#[derive(Clone)]
pub struct LlmRouter {
    inner: Arc<RouterInner>,
}

/// Builder for `LlmRouter`
///
/// Collaborators default to process-local implementations, which is what
/// the CLI uses when no store or cache is configured.
pub struct RouterBuilder {
    registry: ProviderRegistry,
    store: Arc<dyn PolicyStore>,
    ledger: Arc<dyn RunLedger>,
    cache: Arc<dyn ResponseCache>,
    retry: RetryPolicy,
    health: HealthTracker,
    timeouts: TimeoutSection,
    dedup: DedupSection,
    failover: bool,
}

impl RouterBuilder {
    pub fn new(registry: ProviderRegistry) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            registry,
            store: store.clone(),
            ledger: store,
            cache: Arc::new(InMemoryCache::new()),
            retry: RetryPolicy::default(),
            health: HealthTracker::default(),
            timeouts: TimeoutSection::default(),
            dedup: DedupSection::default(),
            failover: true,
        }
    }

    pub fn policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.store = store;
        self
    }

    pub fn run_ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Use one collaborator as both policy store and run ledger
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: PolicyStore + RunLedger + 'static,
    {
        self.store = store.clone();
        self.ledger = store;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn health_tracker(mut self, health: HealthTracker) -> Self {
        self.health = health;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutSection) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn dedup_config(mut self, dedup: DedupSection) -> Self {
        self.dedup = dedup;
        self
    }

    /// Whether `chat` consults the fallback resolver when a provider fails
    pub fn failover(mut self, enabled: bool) -> Self {
        self.failover = enabled;
        self
    }

    pub fn build(self) -> LlmRouter {
        let registry = Arc::new(self.registry);
        let health = Arc::new(self.health);
        health.track(registry.enabled_providers());

        let resolver = PolicyResolver::new(
            Arc::clone(&registry),
            Arc::clone(&self.store),
            Arc::clone(&health),
        );

        LlmRouter {
            inner: Arc::new(RouterInner {
                registry,
                health,
                resolver,
                store: self.store,
                ledger: self.ledger,
                dedup: Deduplicator::new(self.cache, &self.dedup),
                retry: self.retry,
                timeouts: self.timeouts,
                metrics: RouterMetrics::new(),
                failover: self.failover,
            }),
        }
    }
}

/// Why forwarding an adapter stream stopped early
enum StreamFailure {
    Provider(LlmError),
    Disconnected,
}

impl LlmRouter {
    pub fn builder(registry: ProviderRegistry) -> RouterBuilder {
        RouterBuilder::new(registry)
    }

    /// Build a router with adapters, store and cache described by `config`
    pub fn from_config(config: &RouterConfig) -> RouterResult<Self> {
        let registry = ProviderRegistry::from_config(config)
            .map_err(|e| RouterError::Configuration(e.to_string()))?;
        let cache = cache::from_config(&config.cache)
            .map_err(|e| RouterError::Configuration(e.to_string()))?;

        let mut builder = RouterBuilder::new(registry)
            .cache(cache)
            .retry_policy(RetryPolicy::from(&config.retry))
            .health_tracker(HealthTracker::from_config(&config.health))
            .timeouts(config.timeouts.clone())
            .dedup_config(config.dedup.clone());

        if let Some(store) = &config.store {
            let service_key = config
                .store_service_key()
                .map_err(|e| RouterError::Configuration(e.to_string()))?
                .unwrap_or_default();
            let rpc = RpcStore::new(&store.url, service_key)
                .map_err(|e| RouterError::Configuration(e.to_string()))?;
            builder = builder.store(Arc::new(rpc));
        } else {
            info!("No store configured, using in-memory policy store and run ledger");
        }

        Ok(builder.build())
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn health(&self) -> &HealthTracker {
        &self.inner.health
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.inner.metrics
    }

    /// Check the org's monthly spend cap
    ///
    /// Store failures fail open: the request is allowed and the failure logged.
    pub async fn check_spend_cap(&self, org_id: &str) -> SpendCheck {
        match self.inner.store.check_spend_cap(org_id).await {
            Ok(Some(status)) if status.cap_reached => {
                SpendCheck::rejected(spend_cap_reason(&status))
            }
            Ok(Some(status)) => {
                if status.alert_threshold_reached {
                    warn!(
                        org_id = %org_id,
                        current_spend = status.current_spend.unwrap_or_default(),
                        monthly_cap = status.monthly_cap.unwrap_or_default(),
                        "Organization approaching monthly spend cap"
                    );
                }
                SpendCheck::allowed()
            }
            Ok(None) => SpendCheck::allowed(),
            Err(e) => {
                error!(org_id = %org_id, error = %e, "Spend cap check failed, allowing request");
                SpendCheck::allowed()
            }
        }
    }

    pub async fn select_provider(
        &self,
        request: &RouterRequest,
        input_text: &str,
    ) -> RouterResult<ProviderSelection> {
        self.inner.resolver.select_provider(request, input_text).await
    }

    pub async fn get_fallback_provider(
        &self,
        request: &RouterRequest,
        exclude: ProviderId,
    ) -> Option<ProviderSelection> {
        self.inner
            .resolver
            .get_fallback_provider(request, exclude)
            .await
    }

    pub fn is_provider_healthy(&self, provider: ProviderId) -> bool {
        self.inner.health.is_healthy(provider)
    }

    pub fn record_provider_failure(&self, provider: ProviderId) {
        self.inner.health.record_failure(provider);
    }

    pub fn record_provider_success(&self, provider: ProviderId) {
        self.inner.health.record_success(provider);
    }

    /// Actively probe every adapter and feed the results into the tracker
    pub async fn probe_providers(&self) -> Vec<HealthCheckResult> {
        health::probe_providers(&self.inner.registry, &self.inner.health).await
    }

    /// Probe providers every `interval` until the returned task is aborted
    pub fn spawn_health_probes(&self, interval: Duration) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let results = router.probe_providers().await;
                let unhealthy = results.iter().filter(|r| !r.healthy).count();
                debug!(probed = results.len(), unhealthy, "Provider probes finished");
            }
        })
    }

    /// Run one chat completion
    pub async fn chat(
        &self,
        request: &RouterRequest,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> RouterResult<LlmResponse> {
        let started = std::time::Instant::now();
        self.inner.metrics.request_received();

        let span = request_span!(
            org_id = %request.org_id,
            user_id = %request.user_id,
            feature = %request.feature
        );
        let result = self.chat_inner(request, messages, options).instrument(span).await;

        match &result {
            Ok(response) => {
                self.inner.metrics.request_completed(started.elapsed());
                info!(
                    org_id = %request.org_id,
                    provider = %response.provider,
                    model = %response.model,
                    run_id = %response.run_id,
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    tokens_estimated = response.tokens_estimated,
                    "Chat completed"
                );
            }
            Err(e) => {
                self.inner.metrics.request_failed(started.elapsed());
                warn!(org_id = %request.org_id, kind = e.kind(), error = %e, "Chat failed");
            }
        }
        result
    }

    async fn chat_inner(
        &self,
        request: &RouterRequest,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> RouterResult<LlmResponse> {
        let spend = self.check_spend_cap(&request.org_id).await;
        if !spend.allowed {
            self.inner.metrics.spend_cap_rejected();
            return Err(RouterError::SpendCapExceeded {
                reason: spend.reason.unwrap_or_default(),
            });
        }

        let messages = apply_system_prompt(messages, request.system_prompt.as_deref());

        if !dedup_enabled(request.feature, options.skip_dedup) {
            return self.execute(request.clone(), messages, options).await;
        }

        let fingerprint = fingerprint(
            request.feature,
            &messages,
            options.temperature,
            options.max_tokens,
        );
        let key = self.inner.dedup.key(&request.org_id, &fingerprint);
        debug!(fingerprint = %fingerprint, "Deduplicating request");

        let router = self.clone();
        let owned_request = request.clone();
        let work = async move { router.execute(owned_request, messages, options).await }
            .in_current_span();

        let (result, source) = self.inner.dedup.run(&key, work).await;
        match source {
            DedupSource::Cache => self.inner.metrics.cache_hit(),
            DedupSource::Joined => self.inner.metrics.in_flight_joined(),
            DedupSource::Executed => {}
        }
        result
    }

    /// Select, call, and fail over once if the primary provider fails
    async fn execute(
        &self,
        request: RouterRequest,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> RouterResult<LlmResponse> {
        let selection = self
            .select_provider(&request, &input_text(&messages))
            .await?;
        info!(
            provider = %selection.provider,
            model = %selection.model,
            reason = ?selection.reason,
            "Provider selected"
        );

        let budget = self.inner.timeouts.budget_for(request.feature);
        let deadline = deadline_after(budget);

        let primary_error = match self
            .attempt(&request, &selection, &messages, options, deadline, budget)
            .await
        {
            Ok(response) => return Ok(response),
            Err(e @ (RouterError::Provider(_) | RouterError::ProviderUnavailable(_)))
                if self.inner.failover =>
            {
                e
            }
            Err(e) => return Err(e),
        };

        let fallback = if selection.requires_private() {
            self.inner
                .resolver
                .get_private_fallback(&request, selection.provider)
                .await
        } else {
            self.inner
                .resolver
                .get_fallback_provider(&request, selection.provider)
                .await
        };

        let Some(fallback) = fallback else {
            return Err(match primary_error {
                RouterError::Provider(source) => RouterError::NoFallback {
                    provider: selection.provider,
                    source,
                },
                other => other,
            });
        };

        warn!(
            failed = %selection.provider,
            fallback = %fallback.provider,
            error = %primary_error,
            "Primary provider failed, failing over"
        );
        self.inner.metrics.failover();

        self.attempt(&request, &fallback, &messages, options, deadline, budget)
            .await
    }

    /// One provider attempt, bracketed by a run record
    async fn attempt(
        &self,
        request: &RouterRequest,
        selection: &ProviderSelection,
        messages: &[Message],
        options: ChatOptions,
        deadline: Instant,
        budget: Duration,
    ) -> RouterResult<LlmResponse> {
        let run_id = self.start_run(request, selection).await?;

        let Some(adapter) = self.inner.registry.adapter(selection.provider) else {
            let e = RouterError::ProviderUnavailable(selection.provider);
            self.complete_run(RunCompletion::failed(&run_id, e.to_string()))
                .await;
            return Err(e);
        };

        let completion_request = options.completion_request(messages, &selection.model);
        let span = provider_span!(
            provider = %selection.provider,
            model = %selection.model,
            run_id = %run_id
        );
        let outcome = timeout_at(
            deadline,
            self.call_with_retry(adapter.as_ref(), completion_request),
        )
        .instrument(span)
        .await;

        match outcome {
            Ok(Ok(completion)) => {
                self.complete_run(RunCompletion::completed(&run_id, completion.usage))
                    .await;
                let mut response =
                    LlmResponse::from_completion(completion, selection.provider, &run_id);
                if response.model.is_empty() {
                    response.model = selection.model.clone();
                }
                Ok(response)
            }
            Ok(Err(e)) => {
                self.complete_run(RunCompletion::failed(
                    &run_id,
                    sanitize_error_message(&e.to_string()),
                ))
                .await;
                Err(RouterError::Provider(e))
            }
            Err(_) => {
                self.inner.metrics.timeout();
                let e = RouterError::Timeout {
                    budget_ms: budget.as_millis() as u64,
                };
                warn!(provider = %selection.provider, run_id = %run_id, "Provider call exceeded time budget");
                self.complete_run(RunCompletion::cancelled(&run_id, e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn call_with_retry(
        &self,
        adapter: &dyn LlmProvider,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let provider = adapter.id();
        self.inner
            .retry
            .execute(
                provider.as_str(),
                || {
                    let request = request.clone();
                    async move {
                        let result = adapter.chat(request).await;
                        self.record_call(provider, result.as_ref().ok().map(|c| c.usage));
                        result
                    }
                },
                |_, _, _| self.inner.metrics.retry(),
            )
            .await
    }

    fn record_call(&self, provider: ProviderId, usage: Option<TokenUsage>) {
        if usage.is_some() {
            self.inner.health.record_success(provider);
        } else {
            self.inner.health.record_failure(provider);
        }
        self.inner.metrics.provider_call(provider, usage);
    }

    async fn start_run(
        &self,
        request: &RouterRequest,
        selection: &ProviderSelection,
    ) -> RouterResult<String> {
        let run = RunStart {
            org_id: request.org_id.clone(),
            user_id: request.user_id.clone(),
            feature: request.feature,
            provider: selection.provider,
            model: selection.model.clone(),
            metadata: json!({
                "reason": selection.reason,
                "classification": request.effective_classification(),
            }),
        };

        self.inner.ledger.start_run(&run).await.map_err(|e| {
            error!(org_id = %request.org_id, error = %e, "Failed to start AI run");
            RouterError::RunStart(e.to_string())
        })
    }

    async fn complete_run(&self, completion: RunCompletion) {
        if let Err(e) = self.inner.ledger.complete_run(&completion).await {
            error!(run_id = %completion.run_id, error = %e, "Failed to complete AI run");
        }
    }

    /// Stream one chat completion
    ///
    /// Must be called from within a Tokio runtime: the stream is fed by a
    /// spawned task. Dropping the returned stream stops the feeder at its
    /// next chunk. Streams never fail over once a provider is chosen.
    pub fn stream_chat(
        &self,
        request: RouterRequest,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> ChatStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let span = request_span!(
            org_id = %request.org_id,
            user_id = %request.user_id,
            feature = %request.feature,
            streaming = true
        );

        let router = self.clone();
        tokio::spawn(
            async move { router.drive_stream(request, messages, options, tx).await }
                .instrument(span),
        );

        ChatStream::new(rx)
    }

    async fn drive_stream(
        self,
        request: RouterRequest,
        messages: Vec<Message>,
        options: ChatOptions,
        tx: mpsc::Sender<StreamChunk>,
    ) {
        self.inner.metrics.stream_started();

        let terminal = self.run_stream(&request, messages, options, &tx).await;
        let success = matches!(terminal, StreamChunk::Done { .. });
        self.inner.metrics.stream_finished(success);

        if tx.send(terminal).await.is_err() {
            debug!("Stream consumer went away before the terminal chunk");
        }
    }

    /// Forward content chunks and return the terminal chunk
    async fn run_stream(
        &self,
        request: &RouterRequest,
        messages: Vec<Message>,
        options: ChatOptions,
        tx: &mpsc::Sender<StreamChunk>,
    ) -> StreamChunk {
        let spend = self.check_spend_cap(&request.org_id).await;
        if !spend.allowed {
            self.inner.metrics.spend_cap_rejected();
            return StreamChunk::Error {
                error: spend.reason.unwrap_or_default(),
            };
        }

        let messages = apply_system_prompt(messages, request.system_prompt.as_deref());
        let selection = match self.select_provider(request, &input_text(&messages)).await {
            Ok(selection) => selection,
            Err(e) => {
                warn!(error = %e, "Stream rejected during provider selection");
                return StreamChunk::Error {
                    error: e.to_string(),
                };
            }
        };

        let run_id = match self.start_run(request, &selection).await {
            Ok(run_id) => run_id,
            Err(e) => {
                return StreamChunk::Error {
                    error: e.to_string(),
                }
            }
        };

        let Some(adapter) = self.inner.registry.adapter(selection.provider) else {
            let e = RouterError::ProviderUnavailable(selection.provider);
            self.complete_run(RunCompletion::failed(&run_id, e.to_string()))
                .await;
            return StreamChunk::Error {
                error: e.to_string(),
            };
        };

        let budget = self.inner.timeouts.budget_for(request.feature);
        let completion_request = options.completion_request(&messages, &selection.model);
        let span = provider_span!(
            provider = %selection.provider,
            model = %selection.model,
            run_id = %run_id
        );
        let outcome = timeout_at(
            deadline_after(budget),
            self.forward_stream(adapter.as_ref(), completion_request, tx),
        )
        .instrument(span)
        .await;

        match outcome {
            Ok(Ok(usage)) => {
                self.record_call(selection.provider, Some(usage));
                self.complete_run(RunCompletion::completed(&run_id, usage))
                    .await;
                StreamChunk::Done { run_id, usage }
            }
            Ok(Err(StreamFailure::Provider(e))) => {
                self.complete_run(RunCompletion::failed(
                    &run_id,
                    sanitize_error_message(&e.to_string()),
                ))
                .await;
                StreamChunk::Error {
                    error: RouterError::Provider(e).to_string(),
                }
            }
            Ok(Err(StreamFailure::Disconnected)) => {
                debug!(run_id = %run_id, "Stream consumer disconnected");
                self.complete_run(RunCompletion::cancelled(&run_id, "client disconnected"))
                    .await;
                StreamChunk::Error {
                    error: "client disconnected".to_string(),
                }
            }
            Err(_) => {
                self.inner.metrics.timeout();
                let e = RouterError::Timeout {
                    budget_ms: budget.as_millis() as u64,
                };
                self.complete_run(RunCompletion::cancelled(&run_id, e.to_string()))
                    .await;
                StreamChunk::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Open the adapter stream under retry, then relay its events
    ///
    /// Usage comes from the last usage event, or is estimated from the
    /// relayed text when the backend never reports one.
    async fn forward_stream(
        &self,
        adapter: &dyn LlmProvider,
        request: CompletionRequest,
        tx: &mpsc::Sender<StreamChunk>,
    ) -> Result<TokenUsage, StreamFailure> {
        let provider = adapter.id();
        let mut events = self
            .inner
            .retry
            .execute(
                provider.as_str(),
                || {
                    let request = request.clone();
                    async move {
                        let opened = adapter.stream_chat(request).await;
                        if opened.is_err() {
                            self.record_call(provider, None);
                        }
                        opened
                    }
                },
                |_, _, _| self.inner.metrics.retry(),
            )
            .await
            .map_err(StreamFailure::Provider)?;

        let mut usage = None;
        let mut output = String::new();
        while let Some(event) = events.next().await {
            let chunk = match event {
                Ok(StreamEvent::Delta(text)) if text.is_empty() => continue,
                Ok(StreamEvent::Delta(text)) => {
                    output.push_str(&text);
                    StreamChunk::Content { content: text }
                }
                Ok(StreamEvent::ToolCall { name, input }) => StreamChunk::ToolCall {
                    tool_name: name,
                    tool_input: input,
                },
                Ok(StreamEvent::Usage(reported)) => {
                    usage = Some(reported);
                    continue;
                }
                Err(e) => {
                    self.record_call(provider, None);
                    return Err(StreamFailure::Provider(e));
                }
            };
            tx.send(chunk)
                .await
                .map_err(|_| StreamFailure::Disconnected)?;
        }

        Ok(usage.unwrap_or_else(|| TokenUsage::estimate(&request.messages, &output)))
    }
}

/// Stream of chunks for one `stream_chat` call
///
/// Always ends with exactly one `Done` or `Error` chunk; if the feeder task
/// dies without sending one, an `Error` chunk is synthesized.
pub struct ChatStream {
    inner: ReceiverStream<StreamChunk>,
    finished: bool,
}

impl ChatStream {
    fn new(rx: mpsc::Receiver<StreamChunk>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            finished: false,
        }
    }
}

impl Stream for ChatStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(chunk)) => {
                if chunk.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(StreamChunk::Error {
                    error: "stream ended without a terminal chunk".to_string(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Text the classifier sees: every message's content, space separated
fn input_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Prepend `prompt` as a system message unless the conversation has one
fn apply_system_prompt(mut messages: Vec<Message>, prompt: Option<&str>) -> Vec<Message> {
    if let Some(prompt) = prompt {
        if !messages.iter().any(|m| m.role == MessageRole::System) {
            messages.insert(0, Message::system(prompt));
        }
    }
    messages
}
