//! Router metrics
//!
//! Atomic counters for high-frequency events and mutex-protected collections
//! for latencies and per-provider statistics. One collector is owned by each
//! router instance.

use crate::llm::provider::{ProviderId, TokenUsage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug, Default, Clone)]
struct ProviderStats {
    calls: u64,
    failures: u64,
    reported_input_tokens: u64,
    reported_output_tokens: u64,
    estimated_input_tokens: u64,
    estimated_output_tokens: u64,
}

/// Thread-safe router metrics
#[derive(Debug)]
pub struct RouterMetrics {
    requests_received: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    spend_cap_rejections: AtomicU64,
    cache_hits: AtomicU64,
    in_flight_joins: AtomicU64,
    retries: AtomicU64,
    failovers: AtomicU64,
    timeouts: AtomicU64,
    streams_started: AtomicU64,
    streams_completed: AtomicU64,
    streams_failed: AtomicU64,
    started_at: u64,

    latencies: Mutex<Vec<u64>>,
    providers: Mutex<BTreeMap<ProviderId, ProviderStats>>,
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            requests_completed: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            spend_cap_rejections: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            in_flight_joins: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            streams_started: AtomicU64::new(0),
            streams_completed: AtomicU64::new(0),
            streams_failed: AtomicU64::new(0),
            started_at: current_timestamp(),
            latencies: Mutex::new(Vec::new()),
            providers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_completed(&self, duration: Duration) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    pub fn request_failed(&self, duration: Duration) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(duration);
    }

    pub fn spend_cap_rejected(&self) {
        self.spend_cap_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight_joined(&self) {
        self.in_flight_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_finished(&self, success: bool) {
        if success {
            self.streams_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.streams_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One upstream call to `provider`; usage is present on success
    pub fn provider_call(&self, provider: ProviderId, usage: Option<TokenUsage>) {
        if let Ok(mut providers) = self.providers.lock() {
            let stats = providers.entry(provider).or_default();
            stats.calls += 1;
            match usage {
                None => stats.failures += 1,
                Some(usage) if usage.estimated => {
                    stats.estimated_input_tokens += u64::from(usage.input_tokens);
                    stats.estimated_output_tokens += u64::from(usage.output_tokens);
                }
                Some(usage) => {
                    stats.reported_input_tokens += u64::from(usage.input_tokens);
                    stats.reported_output_tokens += u64::from(usage.output_tokens);
                }
            }
        }
    }

    fn record_latency(&self, duration: Duration) {
        if let Ok(mut latencies) = self.latencies.lock() {
            latencies.push(duration.as_millis() as u64);
            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, p50, p95) = match self.latencies.lock() {
            Ok(latencies) if !latencies.is_empty() => {
                let mut sorted = latencies.clone();
                sorted.sort_unstable();
                let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
                (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
            }
            _ => (0.0, 0.0, 0.0),
        };

        let providers: BTreeMap<ProviderId, ProviderStatsSnapshot> = self
            .providers
            .lock()
            .map(|providers| {
                providers
                    .iter()
                    .map(|(id, s)| {
                        (
                            *id,
                            ProviderStatsSnapshot {
                                calls: s.calls,
                                failures: s.failures,
                                reported_input_tokens: s.reported_input_tokens,
                                reported_output_tokens: s.reported_output_tokens,
                                estimated_input_tokens: s.estimated_input_tokens,
                                estimated_output_tokens: s.estimated_output_tokens,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            requests: RequestMetrics {
                received: self.requests_received.load(Ordering::Relaxed),
                completed: self.requests_completed.load(Ordering::Relaxed),
                failed: self.requests_failed.load(Ordering::Relaxed),
                spend_cap_rejections: self.spend_cap_rejections.load(Ordering::Relaxed),
                cache_hits: self.cache_hits.load(Ordering::Relaxed),
                in_flight_joins: self.in_flight_joins.load(Ordering::Relaxed),
                retries: self.retries.load(Ordering::Relaxed),
                failovers: self.failovers.load(Ordering::Relaxed),
                timeouts: self.timeouts.load(Ordering::Relaxed),
                avg_latency_ms: avg,
                latency_p50_ms: p50,
                latency_p95_ms: p95,
            },
            streams: StreamMetrics {
                started: self.streams_started.load(Ordering::Relaxed),
                completed: self.streams_completed.load(Ordering::Relaxed),
                failed: self.streams_failed.load(Ordering::Relaxed),
            },
            providers,
            uptime_seconds: current_timestamp().saturating_sub(self.started_at),
            timestamp: current_timestamp(),
        }
    }
}

/// Serializable point-in-time view of the router metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: RequestMetrics,
    pub streams: StreamMetrics,
    pub providers: BTreeMap<ProviderId, ProviderStatsSnapshot>,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub spend_cap_rejections: u64,
    pub cache_hits: u64,
    pub in_flight_joins: u64,
    pub retries: u64,
    pub failovers: u64,
    pub timeouts: u64,
    pub avg_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub reported_input_tokens: u64,
    pub reported_output_tokens: u64,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
