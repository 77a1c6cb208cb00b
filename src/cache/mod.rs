//! Content-addressed response cache.
//!
//! Maps a fingerprint of (instruction, input) to a previously computed
//! reasoning result so identical requests skip the external call.
//!
//! # Behaviour
//!
//! - Keys are `prompt:<sha256 hex>`
//! - Entries carry a TTL chosen per job kind and are replaced wholesale
//! - Backend failures degrade to misses; they never fail the caller
//! - Hit, miss and error counters cover the process lifetime
//!
//! # Usage
//!
//! ```rust,ignore
//! use insight_worker::cache::{fingerprint, MemoryCacheStore, ResponseCache};
//!
//! let cache = ResponseCache::new(Arc::new(MemoryCacheStore::new()));
//! let key = fingerprint(&prompt.system_instruction, &prompt.user_input);
//! if let Some(hit) = cache.get(&key).await {
//!     return hit.content;
//! }
//! ```

mod fingerprint;
mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::MetricsCollector;
use crate::scheduler::job::{JobKind, TokenUsage};

pub use fingerprint::{fingerprint, CacheKey};
pub use store::{CacheError, CacheStore, MemoryCacheStore, RedisCacheStore};

/// Prefix of every response cache key.
pub const KEY_PREFIX: &str = "prompt:";

/// A cached reasoning result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub estimated_cost: f64,
    pub cached_at: DateTime<Utc>,
}

/// Per-kind cache lifetimes in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub review_secs: u64,
    pub debug_secs: u64,
    pub architecture_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            review_secs: 7 * 24 * 3600,
            debug_secs: 24 * 3600,
            architecture_secs: 7 * 24 * 3600,
        }
    }
}

impl CacheTtls {
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        let secs = match kind {
            JobKind::Review => self.review_secs,
            JobKind::Debug => self.debug_secs,
            JobKind::Architecture => self.architecture_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend or decoding failures (each also counted as a miss).
    pub errors: u64,
}

impl CacheStats {
    /// Returns hits over total lookups, 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn total_lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Response cache over a [`CacheStore`].
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    metrics: MetricsCollector,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            metrics: MetricsCollector::new(),
        }
    }

    fn storage_key(key: &CacheKey) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    fn miss(&self) -> Option<CachedResponse> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_cache_lookup(false);
        None
    }

    /// Looks up a cached response, counting a hit or a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let raw = match self.store.get(&Self::storage_key(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.miss(),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                return self.miss();
            }
        };

        match serde_json::from_str::<CachedResponse>(&raw) {
            Ok(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_cache_lookup(true);
                debug!(key = %key, "Cache hit");
                Some(response)
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Undecodable cache entry, treating as miss");
                self.miss()
            }
        }
    }

    /// Stores a response, replacing any previous one.
    ///
    /// Returns `false` if the backend rejected the write.
    pub async fn put(&self, key: &CacheKey, value: &CachedResponse, ttl: Duration) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to encode cache entry");
                return false;
            }
        };

        match self.store.set(&Self::storage_key(key), &raw, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached response");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Removes a single entry.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.store.delete(&Self::storage_key(key)).await
    }

    /// Removes every response cache entry and returns how many.
    pub async fn evict_all(&self) -> Result<usize, CacheError> {
        let removed = self.store.clear_prefix(KEY_PREFIX).await?;
        tracing::info!(removed = removed, "Cleared response cache");
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::ConnectionFailed("refused".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::ConnectionFailed("refused".to_string()))
        }
        async fn delete(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::ConnectionFailed("refused".to_string()))
        }
        async fn clear_prefix(&self, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::ConnectionFailed("refused".to_string()))
        }
    }

    fn response() -> CachedResponse {
        CachedResponse {
            content: "Consider handling the None case.".to_string(),
            usage: TokenUsage::new(100, 20),
            model: "test-model".to_string(),
            estimated_cost: 0.0006,
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_put_counts() {
        let cache = ResponseCache::new(Arc::new(MemoryCacheStore::new()));
        let key = fingerprint("sys", "input");

        assert!(cache.get(&key).await.is_none());
        assert!(cache.put(&key, &response(), Duration::from_secs(60)).await);
        let stored = response();
        assert!(cache.put(&key, &stored, Duration::from_secs(60)).await);
        assert_eq!(cache.get(&key).await, Some(stored.clone()));
        assert_eq!(cache.get(&key).await, Some(stored));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_miss() {
        let cache = ResponseCache::new(Arc::new(DownStore));
        let key = fingerprint("sys", "input");

        assert!(cache.get(&key).await.is_none());
        assert!(!cache.put(&key, &response(), Duration::from_secs(60)).await);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        let key = fingerprint("sys", "input");
        store
            .set(&format!("prompt:{}", key), "{not json", Duration::from_secs(60))
            .await
            .expect("set should work");

        let cache = ResponseCache::new(store);
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_evict_all() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ResponseCache::new(store.clone());
        let a = fingerprint("sys", "a");
        let b = fingerprint("sys", "b");
        cache.put(&a, &response(), Duration::from_secs(60)).await;
        cache.put(&b, &response(), Duration::from_secs(60)).await;
        store
            .set("other:key", "v", Duration::from_secs(60))
            .await
            .expect("set should work");

        assert!(cache.invalidate(&a).await.expect("invalidate should work"));
        assert!(!cache.invalidate(&a).await.expect("invalidate should work"));
        assert_eq!(cache.evict_all().await.expect("evict should work"), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_ttls_per_kind() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.for_kind(JobKind::Review), Duration::from_secs(604_800));
        assert_eq!(ttls.for_kind(JobKind::Debug), Duration::from_secs(86_400));
        assert_eq!(
            ttls.for_kind(JobKind::Architecture),
            Duration::from_secs(604_800)
        );
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            errors: 0,
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.total_lookups(), 4);
    }
}
