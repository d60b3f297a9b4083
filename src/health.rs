//! Provider health tracking
//!
//! Every provider call outcome feeds a per-provider record. Three consecutive
//! failures mark a provider unhealthy; one success restores it. A record that
//! has not been touched for the staleness window is optimistically reset to
//! healthy so a transient outage with no follow-up traffic cannot poison a
//! provider forever. Active probes call each adapter's own health check and
//! feed the same records.

use crate::config::HealthSection;
use crate::llm::provider::{LlmProvider, ProviderId};
use crate::registry::ProviderRegistry;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Mutable health record for one provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_check: Instant,
    pub consecutive_failures: u32,
}

impl ProviderHealth {
    fn fresh() -> Self {
        Self {
            healthy: true,
            last_check: Instant::now(),
            consecutive_failures: 0,
        }
    }
}

/// Serializable view of one provider's health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealthSnapshot {
    pub provider: ProviderId,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub seconds_since_check: u64,
}

/// Per-provider health state, partitioned so providers never contend
#[derive(Debug)]
pub struct HealthTracker {
    states: DashMap<ProviderId, ProviderHealth>,
    failure_threshold: u32,
    stale_after: Duration,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_STALE_AFTER)
    }
}

impl HealthTracker {
    pub fn new(failure_threshold: u32, stale_after: Duration) -> Self {
        Self {
            states: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
            stale_after,
        }
    }

    pub fn from_config(config: &HealthSection) -> Self {
        Self::new(
            config.failure_threshold,
            Duration::from_secs(config.stale_after_secs),
        )
    }

    /// Start tracking the given providers as healthy
    pub fn track(&self, providers: impl IntoIterator<Item = ProviderId>) {
        for provider in providers {
            self.states.entry(provider).or_insert_with(ProviderHealth::fresh);
        }
    }

    /// Whether the provider may receive failover traffic
    ///
    /// Providers start out healthy, so an untracked provider is healthy.
    pub fn is_healthy(&self, provider: ProviderId) -> bool {
        let mut state = self
            .states
            .entry(provider)
            .or_insert_with(ProviderHealth::fresh);

        if state.last_check.elapsed() > self.stale_after {
            *state = ProviderHealth::fresh();
        }
        state.healthy
    }

    pub fn record_failure(&self, provider: ProviderId) {
        let mut state = self
            .states
            .entry(provider)
            .or_insert_with(ProviderHealth::fresh);
        state.consecutive_failures += 1;
        state.last_check = Instant::now();

        if state.healthy && state.consecutive_failures >= self.failure_threshold {
            state.healthy = false;
            warn!(
                provider = %provider,
                consecutive_failures = state.consecutive_failures,
                "Provider marked unhealthy"
            );
        }
    }

    pub fn record_success(&self, provider: ProviderId) {
        let mut state = self
            .states
            .entry(provider)
            .or_insert_with(ProviderHealth::fresh);
        if !state.healthy {
            debug!(provider = %provider, "Provider recovered");
        }
        *state = ProviderHealth::fresh();
    }

    pub fn get(&self, provider: ProviderId) -> Option<ProviderHealth> {
        self.states.get(&provider).map(|s| *s)
    }

    /// Current state of every tracked provider, ordered by id
    pub fn snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        let mut snapshot: Vec<_> = self
            .states
            .iter()
            .map(|entry| ProviderHealthSnapshot {
                provider: *entry.key(),
                healthy: entry.healthy,
                consecutive_failures: entry.consecutive_failures,
                seconds_since_check: entry.last_check.elapsed().as_secs(),
            })
            .collect();
        snapshot.sort_by_key(|s| s.provider);
        snapshot
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform health check on this component
    async fn health_check(&self) -> HealthCheckResult;

    /// Get the component name for reporting
    fn component_name(&self) -> &str;
}

/// Active probe against one provider adapter
pub struct LlmProviderHealthCheck {
    llm_provider: Arc<dyn LlmProvider>,
}

impl LlmProviderHealthCheck {
    pub fn new(llm_provider: Arc<dyn LlmProvider>) -> Self {
        Self { llm_provider }
    }
}

#[async_trait]
impl HealthCheck for LlmProviderHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let component = self.component_name().to_string();

        match self.llm_provider.health_check().await {
            Ok(()) => {
                let response_time_ms = start.elapsed().as_millis() as u64;
                debug!(
                    provider = %component,
                    response_time_ms,
                    "Provider probe succeeded"
                );

                HealthCheckResult {
                    component,
                    healthy: true,
                    message: None,
                    response_time_ms: Some(response_time_ms),
                }
            }
            Err(e) => {
                let response_time_ms = start.elapsed().as_millis() as u64;
                warn!(
                    provider = %component,
                    error = %e,
                    response_time_ms,
                    "Provider probe failed"
                );

                HealthCheckResult {
                    component,
                    healthy: false,
                    message: Some(e.to_string()),
                    response_time_ms: Some(response_time_ms),
                }
            }
        }
    }

    fn component_name(&self) -> &str {
        self.llm_provider.name()
    }
}

/// Probe every registered adapter concurrently and record the outcomes
pub async fn probe_providers(
    registry: &ProviderRegistry,
    tracker: &HealthTracker,
) -> Vec<HealthCheckResult> {
    let probes = registry.adapters().map(|(id, adapter)| async move {
        let result = LlmProviderHealthCheck::new(adapter).health_check().await;
        (id, result)
    });

    let mut results = Vec::new();
    for (id, result) in futures::future::join_all(probes).await {
        if result.healthy {
            tracker.record_success(id);
        } else {
            tracker.record_failure(id);
        }
        results.push(result);
    }
    results
}
