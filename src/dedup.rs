//! Request deduplication
//!
//! Identical non-chat requests from the same organization collapse into one
//! upstream call. A request is first looked up in the shared cache; on a miss
//! it joins an identical request already in flight, or becomes the in-flight
//! request that others join. The in-flight work runs on its own task, so the
//! entry is removed when the work settles even if every waiter has gone away.

use crate::cache::ResponseCache;
use crate::config::DedupSection;
use crate::error::{RouterError, RouterResult};
use crate::llm::provider::{LlmResponse, Message, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::policy::Feature;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hex characters kept from the SHA-256 digest
pub const FINGERPRINT_LEN: usize = 32;

type SharedResult = Shared<BoxFuture<'static, RouterResult<LlmResponse>>>;

#[derive(Serialize)]
struct FingerprintPayload<'a> {
    feature: Feature,
    messages: Vec<FingerprintMessage<'a>>,
    options: FingerprintOptions,
}

#[derive(Serialize)]
struct FingerprintMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintOptions {
    temperature: f32,
    max_tokens: u32,
}

/// Stable hash over feature, ordered messages and sampling options
pub fn fingerprint(
    feature: Feature,
    messages: &[Message],
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> String {
    let payload = FingerprintPayload {
        feature,
        messages: messages
            .iter()
            .map(|m| FingerprintMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        options: FingerprintOptions {
            temperature: temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        },
    };

    // Serializing plain structs of strings and numbers cannot fail
    let canonical = serde_json::to_vec(&payload).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Deduplication is pointless for conversational turns
pub fn dedup_enabled(feature: Feature, skip_dedup: bool) -> bool {
    feature != Feature::Chat && !skip_dedup
}

/// Where a deduplicated result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupSource {
    Cache,
    Joined,
    Executed,
}

/// Cache plus in-flight map
pub struct Deduplicator {
    cache: Arc<dyn ResponseCache>,
    in_flight: Arc<DashMap<String, SharedResult>>,
    ttl: Duration,
    key_prefix: String,
}

impl Deduplicator {
    pub fn new(cache: Arc<dyn ResponseCache>, config: &DedupSection) -> Self {
        Self {
            cache,
            in_flight: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// Cache and in-flight key, scoped by organization
    pub fn key(&self, org_id: &str, fingerprint: &str) -> String {
        format!("{}{}:{}", self.key_prefix, org_id, fingerprint)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Cached response; read failures and undecodable entries are misses
    pub async fn cached(&self, key: &str) -> Option<LlmResponse> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Resolve `key` from the cache, an identical in-flight request, or `work`
    ///
    /// `work` is only polled when this call becomes the in-flight request.
    pub async fn run<F>(&self, key: &str, work: F) -> (RouterResult<LlmResponse>, DedupSource)
    where
        F: Future<Output = RouterResult<LlmResponse>> + Send + 'static,
    {
        if let Some(response) = self.cached(key).await {
            debug!(key, "Dedup cache hit");
            return (Ok(response), DedupSource::Cache);
        }

        let (shared, source) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), DedupSource::Joined),
            Entry::Vacant(entry) => {
                let shared = self.spawn_in_flight(key.to_string(), work);
                entry.insert(shared.clone());
                (shared, DedupSource::Executed)
            }
        };

        if source == DedupSource::Joined {
            debug!(key, "Joining in-flight request");
        }
        (shared.await, source)
    }

    fn spawn_in_flight<F>(&self, key: String, work: F) -> SharedResult
    where
        F: Future<Output = RouterResult<LlmResponse>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let guard = InFlightGuard {
            map: Arc::clone(&self.in_flight),
            key: key.clone(),
        };
        let ttl = self.ttl;

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = work.await;
            if let Ok(response) = &result {
                store(cache.as_ref(), &key, ttl, response).await;
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(RouterError::Internal(format!("deduplicated request task failed: {e}")))
            })
        }
        .boxed()
        .shared()
    }
}

async fn store(cache: &dyn ResponseCache, key: &str, ttl: Duration, response: &LlmResponse) {
    let raw = match serde_json::to_string(response) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "Failed to serialize response for cache");
            return;
        }
    };
    if let Err(e) = cache.setex(key, ttl, raw).await {
        warn!(key, error = %e, "Cache write failed");
    }
}

/// Removes the in-flight entry when the work settles, panics included
struct InFlightGuard {
    map: Arc<DashMap<String, SharedResult>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::llm::provider::ProviderId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn response(content: &str) -> LlmResponse {
        LlmResponse {
            content: content.to_string(),
            input_tokens: 3,
            output_tokens: 2,
            provider: ProviderId::Anthropic,
            model: "claude".to_string(),
            run_id: "run-1".to_string(),
            tokens_estimated: false,
        }
    }

    fn dedup(cache: Arc<InMemoryCache>) -> Deduplicator {
        Deduplicator::new(cache, &DedupSection::default())
    }

    #[test]
    fn test_fingerprint_is_stable_and_truncated() {
        let messages = vec![Message::system("be brief"), Message::user("summarize")];
        let a = fingerprint(Feature::BriefGeneration, &messages, None, None);
        let b = fingerprint(Feature::BriefGeneration, &messages, Some(0.7), Some(4096));
        assert_eq!(a, b);
        assert_eq!(a.len(), FINGERPRINT_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_distinguishes_inputs() {
        let messages = vec![Message::user("summarize")];
        let base = fingerprint(Feature::BriefGeneration, &messages, None, None);

        assert_ne!(base, fingerprint(Feature::EntityLinking, &messages, None, None));
        assert_ne!(base, fingerprint(Feature::BriefGeneration, &messages, Some(0.2), None));
        assert_ne!(base, fingerprint(Feature::BriefGeneration, &messages, None, Some(100)));
        assert_ne!(
            base,
            fingerprint(Feature::BriefGeneration, &[Message::assistant("summarize")], None, None)
        );
    }

    #[test]
    fn test_dedup_disabled_for_chat_and_opt_out() {
        assert!(!dedup_enabled(Feature::Chat, false));
        assert!(!dedup_enabled(Feature::BriefGeneration, true));
        assert!(dedup_enabled(Feature::SemanticSearch, false));
    }

    #[test]
    fn test_key_is_scoped_by_org() {
        let dedup = dedup(Arc::new(InMemoryCache::new()));
        assert_eq!(dedup.key("org-1", "abc"), "ai:dedup:org-1:abc");
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_share_one_execution() {
        let dedup = dedup(Arc::new(InMemoryCache::new()));
        let executions = Arc::new(AtomicU32::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let counter = Arc::clone(&executions);
        let first = dedup.run("k", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = release_rx.await;
            Ok(response("shared"))
        });

        let counter = Arc::clone(&executions);
        let second = dedup.run("k", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(response("duplicate"))
        });

        let release = async {
            tokio::task::yield_now().await;
            let _ = release_tx.send(());
        };

        let ((a, source_a), (b, source_b), ()) = tokio::join!(first, second, release);

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(source_a, DedupSource::Executed);
        assert_eq!(source_b, DedupSource::Joined);
        assert_eq!(dedup.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_success_is_cached_and_failure_is_not() {
        let cache = Arc::new(InMemoryCache::new());
        let dedup = dedup(Arc::clone(&cache));

        let (result, _) = dedup
            .run("fail", async { Err(RouterError::Internal("boom".into())) })
            .await;
        assert!(result.is_err());
        assert!(dedup.cached("fail").await.is_none());
        assert_eq!(dedup.in_flight_count(), 0);

        let (result, source) = dedup.run("ok", async { Ok(response("fresh")) }).await;
        assert_eq!(source, DedupSource::Executed);
        assert_eq!(result.unwrap().content, "fresh");

        let (result, source) = dedup
            .run("ok", async { Ok(response("should not run")) })
            .await;
        assert_eq!(source, DedupSource::Cache);
        assert_eq!(result.unwrap().content, "fresh");
    }

    fn explode() -> RouterResult<LlmResponse> {
        panic!("provider exploded")
    }

    #[tokio::test]
    async fn test_entry_removed_when_work_panics() {
        let dedup = dedup(Arc::new(InMemoryCache::new()));

        let (result, _) = dedup.run("panics", async { explode() }).await;

        assert!(matches!(result, Err(RouterError::Internal(_))));
        assert_eq!(dedup.in_flight_count(), 0);
    }
}
