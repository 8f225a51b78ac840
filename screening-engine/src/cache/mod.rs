pub mod memory;
pub mod redis_store;

use crate::error::CacheError;
use crate::types::ScreeningResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: ScreeningResult,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Key-value backing store. Writes of a whole entry are atomic.
///
/// Tags group keys for invalidation and live in the store next to the entries,
/// so every process sharing a store sees the same groups.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn put(&self, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError>;
    /// Stores only when no live entry exists. Returns whether this write won.
    async fn put_if_absent(&self, entry: CacheEntry, ttl: Duration) -> Result<bool, CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Records `key` under every tag until `expires_at`
    async fn add_tags(&self, key: &str, tags: &[String], expires_at: DateTime<Utc>) -> Result<(), CacheError>;
    /// Removes a tag and returns the keys recorded under it
    async fn take_tag(&self, tag: &str) -> Result<Vec<String>, CacheError>;

    /// Drops expired entries and tag members the store does not expire by itself
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

pub fn source_tag(source_id: &str) -> String {
    format!("source:{}", source_id)
}

pub fn subject_tag(subject_fingerprint: &str) -> String {
    format!("subject:{}", subject_fingerprint)
}

/// Screening results keyed by query fingerprint, tagged by source and subject
/// so they can be dropped on either. Backend failures read as misses.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    version: AtomicU64,
    /// Bumped by every invalidation so in-flight writers can tell their data went stale
    generation: AtomicU64,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self {
            store,
            default_ttl,
            version: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        }
    }

    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), default_ttl)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn get(&self, key: &str) -> Option<ScreeningResult> {
        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(Utc::now()) => Some(entry.value),
            Ok(_) => None,
            Err(e) => {
                warn!("Result cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, value: ScreeningResult, ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = self.entry(key, value, ttl);
        let tags = tags(&entry.value);
        let expires_at = entry.expires_at;

        self.store.put(entry, ttl).await?;
        self.store.add_tags(key, &tags, expires_at).await
    }

    /// Stores `value` unless another writer already has. Returns the value that
    /// is now cached, or `value` itself when the backend is unavailable.
    pub async fn put_if_absent(&self, key: &str, value: ScreeningResult, ttl: Option<Duration>) -> ScreeningResult {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = self.entry(key, value.clone(), ttl);
        let tags = tags(&entry.value);
        let expires_at = entry.expires_at;

        match self.store.put_if_absent(entry, ttl).await {
            Ok(true) => {
                if let Err(e) = self.store.add_tags(key, &tags, expires_at).await {
                    // An untagged entry could not be invalidated, so it is not kept
                    warn!("Result cache tagging failed for {}: {}", key, e);
                    self.invalidate(key).await;
                }
                value
            }
            Ok(false) => {
                debug!("Result for {} already cached by another writer", key);
                self.get(key).await.unwrap_or(value)
            }
            Err(e) => {
                warn!("Result cache write failed for {}: {}", key, e);
                value
            }
        }
    }

    /// `put_if_absent` for a value computed while the cache stood at
    /// `generation`. Nothing is kept when an invalidation happened before or
    /// during the write.
    pub async fn put_if_current(
        &self,
        key: &str,
        value: ScreeningResult,
        ttl: Option<Duration>,
        generation: u64,
    ) -> ScreeningResult {
        if self.generation() != generation {
            debug!("Not caching {}: cache was invalidated while it was computed", key);
            return value;
        }

        let stored = self.put_if_absent(key, value, ttl).await;
        if self.generation() != generation {
            debug!("Dropping {}: cache was invalidated during the write", key);
            self.invalidate(key).await;
        }
        stored
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.store.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Result cache delete failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Drops every result that queried or failed on `source_id`
    pub async fn invalidate_by_source(&self, source_id: &str) -> usize {
        let removed = self.invalidate_tag(&source_tag(source_id)).await;
        info!("Invalidated {} cached results for source {}", removed, source_id);
        removed
    }

    /// Drops every result for one subject, whatever options produced it
    pub async fn invalidate_by_subject(&self, subject_fingerprint: &str) -> usize {
        let removed = self.invalidate_tag(&subject_tag(subject_fingerprint)).await;
        info!("Invalidated {} cached results for subject {}", removed, subject_fingerprint);
        removed
    }

    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    debug!("Purged {} expired cached results", purged);
                }
                purged
            }
            Err(e) => {
                warn!("Result cache purge failed: {}", e);
                0
            }
        }
    }

    async fn invalidate_tag(&self, tag: &str) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let keys = match self.store.take_tag(tag).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Result cache tag lookup failed for {}: {}", tag, e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Result cache delete failed for {}: {}", key, e),
            }
        }
        removed
    }

    fn entry(&self, key: &str, value: ScreeningResult, ttl: Duration) -> CacheEntry {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        CacheEntry {
            key: key.to_string(),
            value,
            expires_at: Utc::now() + ttl,
            version: self.version.fetch_add(1, Ordering::SeqCst),
        }
    }
}

fn tags(value: &ScreeningResult) -> Vec<String> {
    value
        .sources_involved()
        .map(|s| source_tag(s))
        .chain(std::iter::once(subject_tag(&value.subject_fingerprint)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RiskLevel, ScreeningStatus};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn result(subject: &str, queried: &[&str], failed: &[&str]) -> ScreeningResult {
        ScreeningResult {
            screening_id: Uuid::new_v4(),
            query_fingerprint: format!("q-{}", subject),
            subject_fingerprint: subject.to_string(),
            status: if failed.is_empty() {
                ScreeningStatus::Completed
            } else {
                ScreeningStatus::PartialFailure
            },
            risk_level: RiskLevel::Low,
            matches: Vec::new(),
            sources_queried: queried.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            sources_failed: failed.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            completed_at: Utc::now(),
            duration_ms: 3,
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }
        async fn put(&self, _entry: CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }
        async fn put_if_absent(&self, _entry: CacheEntry, _ttl: Duration) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }
        async fn add_tags(&self, _key: &str, _tags: &[String], _expires_at: DateTime<Utc>) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }
        async fn take_tag(&self, _tag: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Backend("connection reset".to_string()))
        }
    }

    /// Holds a conditional write open until released, after the entry is in
    struct GatedStore {
        inner: InMemoryStore,
        written: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl CacheStore for GatedStore {
        async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
            self.inner.get(key).await
        }
        async fn put(&self, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
            self.inner.put(entry, ttl).await
        }
        async fn put_if_absent(&self, entry: CacheEntry, ttl: Duration) -> Result<bool, CacheError> {
            let won = self.inner.put_if_absent(entry, ttl).await?;
            self.written.notify_one();
            self.release.notified().await;
            Ok(won)
        }
        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.delete(key).await
        }
        async fn add_tags(&self, key: &str, tags: &[String], expires_at: DateTime<Utc>) -> Result<(), CacheError> {
            self.inner.add_tags(key, tags, expires_at).await
        }
        async fn take_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
            self.inner.take_tag(tag).await
        }
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ResultCache::in_memory(Duration::from_secs(60));
        let value = result("s1", &["ofac"], &[]);
        cache.put("k1", value.clone(), None).await.unwrap();

        assert_eq!(cache.get("k1").await, Some(value));
        assert_eq!(cache.get("k2").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent() {
        let cache = ResultCache::in_memory(Duration::from_secs(60));
        cache
            .put("k1", result("s1", &["ofac"], &[]), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(cache.get("k1").await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get("k1").await.is_none());

        // An expired entry does not block a new conditional write
        let fresh = result("s1", &["un"], &[]);
        assert_eq!(cache.put_if_absent("k1", fresh.clone(), None).await, fresh);
    }

    #[tokio::test]
    async fn test_put_if_absent_returns_winner() {
        let cache = ResultCache::in_memory(Duration::from_secs(60));
        let first = result("s1", &["ofac"], &[]);
        let second = result("s1", &["ofac"], &[]);

        assert_eq!(cache.put_if_absent("k1", first.clone(), None).await, first);
        assert_eq!(cache.put_if_absent("k1", second, None).await, first);
    }

    #[tokio::test]
    async fn test_invalidate_by_source_covers_failed_sources() {
        let cache = ResultCache::in_memory(Duration::from_secs(60));
        cache.put("a", result("s1", &["ofac", "un"], &[]), None).await.unwrap();
        cache.put("b", result("s2", &["ofac"], &["un"]), None).await.unwrap();
        cache.put("c", result("s3", &["ofac"], &[]), None).await.unwrap();

        let before = cache.generation();
        assert_eq!(cache.invalidate_by_source("un").await, 2);
        assert!(cache.generation() > before);

        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.invalidate_by_source("un").await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_subject() {
        let cache = ResultCache::in_memory(Duration::from_secs(60));
        cache.put("a", result("s1", &["ofac"], &[]), None).await.unwrap();
        cache.put("b", result("s1", &["un"], &[]), None).await.unwrap();
        cache.put("c", result("s2", &["ofac"], &[]), None).await.unwrap();

        assert_eq!(cache.invalidate_by_subject("s1").await, 2);
        assert!(cache.get("c").await.is_some());
        assert!(cache.invalidate("c").await);
        assert!(cache.get("c").await.is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_degrades_to_miss() {
        let cache = ResultCache::new(Arc::new(BrokenStore), Duration::from_secs(60));
        let value = result("s1", &["ofac"], &[]);

        assert!(cache.get("k1").await.is_none());
        assert!(cache.put("k1", value.clone(), None).await.is_err());
        assert_eq!(cache.put_if_absent("k1", value.clone(), None).await, value);
        assert!(!cache.invalidate("k1").await);
        assert_eq!(cache.invalidate_by_source("ofac").await, 0);
    }

    #[tokio::test]
    async fn test_invalidation_reaches_other_instances_on_shared_store() {
        let store = Arc::new(InMemoryStore::new());
        let writer = ResultCache::new(store.clone(), Duration::from_secs(60));
        let other = ResultCache::new(store.clone(), Duration::from_secs(60));

        writer.put("a", result("s1", &["ofac"], &[]), None).await.unwrap();
        writer.put("b", result("s2", &["un"], &[]), None).await.unwrap();
        writer
            .put_if_absent("c", result("s2", &["ofac"], &[]), None)
            .await;

        assert_eq!(other.invalidate_by_source("ofac").await, 2);
        assert!(writer.get("a").await.is_none());
        assert!(writer.get("c").await.is_none());
        assert!(writer.get("b").await.is_some());

        // A fresh instance, as after a restart, still finds the subject's results
        let restarted = ResultCache::new(store, Duration::from_secs(60));
        assert_eq!(restarted.invalidate_by_subject("s2").await, 1);
        assert!(writer.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_entries() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ResultCache::new(store.clone(), Duration::from_secs(60));
        cache
            .put("old", result("s1", &["ofac"], &[]), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.put("new", result("s2", &["ofac"], &[]), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.len(), 2);
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_drops_expired_tag_members() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ResultCache::new(store.clone(), Duration::from_secs(60));
        for i in 0..200 {
            let subject = format!("s{}", i);
            let source = if i % 2 == 0 { "ofac" } else { "un" };
            cache
                .put(&format!("k{}", i), result(&subject, &[source], &[]), Some(Duration::from_millis(5)))
                .await
                .unwrap();
        }
        cache.put("live", result("kept", &["eu"], &[]), None).await.unwrap();
        assert_eq!(store.tag_count(), 204);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().await, 200);

        // Only the live entry's source and subject tags remain
        assert_eq!(store.tag_count(), 2);
        assert_eq!(store.tagged_key_count(), 2);
        assert_eq!(cache.invalidate_by_subject("kept").await, 1);
    }

    #[tokio::test]
    async fn test_stale_generation_is_not_cached() {
        let cache = ResultCache::in_memory(Duration::from_secs(60));
        let generation = cache.generation();
        cache.invalidate_by_source("ofac").await;

        let value = result("s1", &["ofac"], &[]);
        assert_eq!(cache.put_if_current("k1", value.clone(), None, generation).await, value);
        assert!(cache.get("k1").await.is_none());

        let current = cache.generation();
        cache.put_if_current("k1", value.clone(), None, current).await;
        assert_eq!(cache.get("k1").await, Some(value));
    }

    #[tokio::test]
    async fn test_invalidation_during_write_drops_the_entry() {
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new(),
            written: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let cache = Arc::new(ResultCache::new(store.clone(), Duration::from_secs(60)));
        let generation = cache.generation();

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .put_if_current("k1", result("s1", &["ofac"], &[]), None, generation)
                    .await
            })
        };

        // The entry is stored but not yet tagged, so the subject sweep misses it
        store.written.notified().await;
        assert_eq!(cache.invalidate_by_subject("s1").await, 0);
        store.release.notify_one();

        writer.await.unwrap();
        assert!(cache.get("k1").await.is_none());
    }
}
