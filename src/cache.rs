//! Shared response cache
//!
//! Stores serialized responses under dedup keys with a TTL. The router treats
//! every cache error as a miss (on read) or a no-op (on write).

use crate::config::{CacheBackend, CacheSection};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::info;

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache backend errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),
    #[error("Cache command failed: {0}")]
    Command(String),
}

/// Key/value store with expiry, shared across router instances
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<(), CacheError>;
}

/// Build the configured cache backend
pub fn from_config(config: &CacheSection) -> Result<Arc<dyn ResponseCache>, CacheError> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(InMemoryCache::with_capacity(config.max_entries))),
        CacheBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| CacheError::Connection("redis_url is not set".to_string()))?;
            Ok(Arc::new(RedisCache::new(url)?))
        }
    }
}

/// Upper bound on process-local entries when none is configured
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Cached body plus the TTL it was written with
#[derive(Debug, Clone)]
struct CachedValue {
    body: String,
    ttl: Duration,
}

/// Expires each entry after the TTL given to its latest write
struct WriteTtl;

impl Expiry<String, CachedValue> for WriteTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local cache with per-entry TTL and bounded capacity
///
/// Expired and over-capacity entries are evicted by moka's housekeeping,
/// whether or not their keys are read again.
#[derive(Clone)]
pub struct InMemoryCache {
    entries: Cache<String, CachedValue>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(WriteTtl)
            .build();
        Self { entries }
    }

    /// Entry count as of the last housekeeping run
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply pending evictions now instead of on moka's schedule
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl ResponseCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).await.map(|value| value.body))
    }

    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CachedValue { body: value, ttl })
            .await;
        Ok(())
    }
}

/// Redis-backed cache shared between processes
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    /// Create the client; connections are opened per command
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)
            .map_err(|e| CacheError::Connection(format!("invalid redis url: {e}")))?;
        info!("Redis response cache configured");
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        timeout(
            REDIS_CONNECT_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Connection("timed out connecting to redis".to_string()))?
        .map_err(|e| CacheError::Connection(e.to_string()))
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Command(format!("GET {key}: {e}")))?;
        Ok(value)
    }

    async fn setex(&self, key: &str, ttl: Duration, value: String) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Command(format!("SETEX {key}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .setex("ai:dedup:org:abc", Duration::from_millis(50), "value".into())
            .await
            .unwrap();

        assert_eq!(
            cache.get("ai:dedup:org:abc").await.unwrap().as_deref(),
            Some("value")
        );

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("ai:dedup:org:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_without_reads() {
        let cache = InMemoryCache::new();
        for i in 0..1_000 {
            cache
                .setex(&format!("ai:dedup:org:{i}"), Duration::from_millis(50), "v".into())
                .await
                .unwrap();
        }
        cache.run_pending_tasks().await;
        assert_eq!(cache.len(), 1_000);

        tokio::time::sleep(Duration::from_millis(120)).await;
        cache
            .setex("ai:dedup:org:fresh", Duration::from_secs(300), "v".into())
            .await
            .unwrap();
        cache.run_pending_tasks().await;

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_bounds_entries() {
        let cache = InMemoryCache::with_capacity(100);
        for i in 0..1_000 {
            cache
                .setex(&format!("key-{i}"), Duration::from_secs(300), "v".into())
                .await
                .unwrap();
        }
        cache.run_pending_tasks().await;

        assert!(cache.len() <= 100);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_value_and_ttl() {
        let cache = InMemoryCache::new();
        cache
            .setex("k", Duration::from_millis(50), "old".into())
            .await
            .unwrap();
        cache
            .setex("k", Duration::from_secs(300), "new".into())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.get("absent").await.unwrap(), None);
    }

    #[test]
    fn test_redis_backend_rejects_bad_url() {
        let config = CacheSection {
            backend: CacheBackend::Redis,
            redis_url: Some("not-a-redis-url".to_string()),
            ..Default::default()
        };
        assert!(matches!(from_config(&config), Err(CacheError::Connection(_))));
    }

    #[test]
    fn test_memory_backend_is_default() {
        assert!(from_config(&CacheSection::default()).is_ok());
    }
}
