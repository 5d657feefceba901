//! Best-effort key/value cache.
//!
//! The scheduler uses the cache for two things:
//!
//! - `block_number_<chain>`: the last head read by a worker, used to seed new jobs
//! - `event_<job>_<tx_hash>_<log_index>`: duplicate suppression for detected events
//!
//! Every cache failure is logged at debug level and treated as a miss.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::client::ChainClient;
use crate::error::{CacheError, ClientError};
use crate::job::JobId;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// `false` for caches that never store anything.
    fn is_available(&self) -> bool {
        true
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// In-process cache with per-entry expiry. Expired entries are dropped lazily
/// on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

// ─── Keys ────────────────────────────────────────────────────────────────────

pub fn block_number_key(chain_id: &str) -> String {
    format!("block_number_{chain_id}")
}

pub fn event_key(job_id: JobId, tx_hash: &str, log_index: u64) -> String {
    format!("event_{job_id}_{tx_hash}_{log_index}")
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Current block number of `chain_id`, served from the cache when fresh and
/// written back after an RPC read.
pub async fn cached_block_number(
    cache: &dyn Cache,
    client: &dyn ChainClient,
    chain_id: &str,
    ttl: Duration,
) -> Result<u64, ClientError> {
    let key = block_number_key(chain_id);

    match cache.get(&key).await {
        Ok(Some(raw)) => match raw.parse::<u64>() {
            Ok(block) => return Ok(block),
            Err(_) => tracing::debug!(key, raw, "ignoring malformed cached block number"),
        },
        Ok(None) => {}
        Err(e) => tracing::debug!(key, error = %e, "cache read failed, falling back to RPC"),
    }

    let block = client.block_number().await?;
    store_block_number(cache, chain_id, block, ttl).await;
    Ok(block)
}

/// Best-effort write of a freshly read head for `chain_id`.
pub async fn store_block_number(cache: &dyn Cache, chain_id: &str, block: u64, ttl: Duration) {
    let key = block_number_key(chain_id);
    if let Err(e) = cache.set(&key, &block.to_string(), ttl).await {
        tracing::debug!(key, error = %e, "cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use super::*;
    use crate::client::{EventLog, LogFilter};

    struct CountingClient {
        head: AtomicU64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChainClient for CountingClient {
        async fn block_number(&self) -> Result<u64, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.head.load(Ordering::SeqCst))
        }
        async fn filter_logs(&self, _filter: &LogFilter) -> Result<Vec<EventLog>, ClientError> {
            Ok(vec![])
        }
        async fn chain_id(&self) -> Result<u64, ClientError> {
            Ok(1)
        }
        fn close(&self) {}
    }

    fn client(head: u64) -> CountingClient {
        CountingClient {
            head: AtomicU64::new(head),
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn memory_cache_expires_entries() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(2)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn noop_cache_never_hits() {
        let cache = NoopCache;
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn block_number_is_served_from_cache_until_ttl() {
        let cache = MemoryCache::new();
        let client = client(100);
        let ttl = Duration::from_secs(120);

        assert_eq!(cached_block_number(&cache, &client, "1", ttl).await.unwrap(), 100);
        client.head.store(105, Ordering::SeqCst);
        assert_eq!(cached_block_number(&cache, &client, "1", ttl).await.unwrap(), 100);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(ttl + Duration::from_secs(1)).await;
        assert_eq!(cached_block_number(&cache, &client, "1", ttl).await.unwrap(), 105);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_cached_value_falls_back_to_rpc() {
        let cache = MemoryCache::new();
        cache
            .set(&block_number_key("1"), "not-a-number", Duration::from_secs(60))
            .await
            .unwrap();
        let client = client(42);
        let block = cached_block_number(&cache, &client, "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(block, 42);
    }

    #[test]
    fn key_formats() {
        assert_eq!(block_number_key("11155111"), "block_number_11155111");
        assert_eq!(event_key(7, "0xabc", 3), "event_7_0xabc_3");
    }
}
