use super::{CacheEntry, CacheStore};
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Shared store for multi-instance deployments. Entries are JSON under `<prefix>:<fingerprint>`
/// and expire through Redis TTLs. Tags are sorted sets under `<prefix>:tag:<tag>` scored by
/// member expiry; each set expires with its longest-lived member.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("Connected result cache to Redis");
        Ok(Self::new(manager, key_prefix))
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.key_prefix, tag)
    }
}

// Redis TTLs are whole seconds and must be positive
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let raw: Option<String> = self.redis.clone().get(self.key(key)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(&entry)?;
        let _: () = self.redis.clone().set_ex(self.key(&entry.key), json, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn put_if_absent(&self, entry: CacheEntry, ttl: Duration) -> Result<bool, CacheError> {
        let json = serde_json::to_string(&entry)?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(&entry.key))
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed: i64 = self.redis.clone().del(self.key(key)).await?;
        Ok(removed > 0)
    }

    async fn add_tags(&self, key: &str, tags: &[String], expires_at: DateTime<Utc>) -> Result<(), CacheError> {
        let now = Utc::now().timestamp();
        let expires = expires_at.timestamp();
        let mut conn = self.redis.clone();

        for tag in tags {
            let tag_key = self.tag_key(tag);
            let (_, _, latest): ((), (), Vec<(String, f64)>) = redis::pipe()
                .atomic()
                .cmd("ZREMRANGEBYSCORE")
                .arg(&tag_key)
                .arg("-inf")
                .arg(now)
                .cmd("ZADD")
                .arg(&tag_key)
                .arg(expires)
                .arg(key)
                .cmd("ZRANGE")
                .arg(&tag_key)
                .arg(-1)
                .arg(-1)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await?;

            let expire_at = latest
                .first()
                .map_or(expires, |(_, score)| (*score as i64).max(expires));
            let _: () = redis::cmd("EXPIREAT")
                .arg(&tag_key)
                .arg(expire_at)
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn take_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        let tag_key = self.tag_key(tag);
        let (keys,): (Vec<String>,) = redis::pipe()
            .atomic()
            .cmd("ZRANGE")
            .arg(&tag_key)
            .arg(0)
            .arg(-1)
            .cmd("DEL")
            .arg(&tag_key)
            .ignore()
            .query_async(&mut self.redis.clone())
            .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_rounds_up_to_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(300)), 300);
    }
}
