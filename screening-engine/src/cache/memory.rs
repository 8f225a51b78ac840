use super::{CacheEntry, CacheStore};
use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

/// Process-local store. Expired entries read as absent and are dropped lazily
/// or by `purge_expired`, together with their tag memberships.
#[derive(Default)]
pub struct InMemoryStore {
    entries: DashMap<String, CacheEntry>,
    // tag -> (key -> expiry)
    tags: DashMap<String, HashMap<String, DateTime<Utc>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn tagged_key_count(&self) -> usize {
        self.tags.iter().map(|t| t.value().len()).sum()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let now = Utc::now();
        let found = self.entries.get(key).map(|e| e.value().clone());
        match found {
            Some(entry) if entry.is_expired_at(now) => {
                self.entries.remove_if(key, |_, e| e.is_expired_at(now));
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn put(&self, entry: CacheEntry, _ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn put_if_absent(&self, entry: CacheEntry, _ttl: Duration) -> Result<bool, CacheError> {
        let now = Utc::now();
        match self.entries.entry(entry.key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired_at(now) {
                    occupied.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn add_tags(&self, key: &str, tags: &[String], expires_at: DateTime<Utc>) -> Result<(), CacheError> {
        let now = Utc::now();
        for tag in tags {
            let mut keys = self.tags.entry(tag.clone()).or_default();
            keys.retain(|_, exp| *exp > now);
            keys.insert(key.to_string(), expires_at);
        }
        Ok(())
    }

    async fn take_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .tags
            .remove(tag)
            .map(|(_, keys)| keys.into_keys().collect())
            .unwrap_or_default())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));

        self.tags.retain(|_, keys| {
            keys.retain(|_, exp| *exp > now);
            !keys.is_empty()
        });
        Ok(before.saturating_sub(self.entries.len()))
    }
}
