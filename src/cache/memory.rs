//! In-memory cache store backed by a concurrent map.
//!
//! Mirrors the Redis store's semantics closely enough for tests and local
//! development: values expire lazily on access.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::cache::CacheStore;
use crate::core::error::GatewayResult;

/// In-memory store with lazily-expired entries
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    data: DashMap<String, (String, Instant)>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Drop expired entries eagerly
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.data.retain(|_, (_, expiry)| *expiry > now);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        if let Some(entry) = self.data.get(key) {
            let (value, expiry) = entry.value();
            if *expiry > Instant::now() {
                return Ok(Some(value.clone()));
            }
        }
        self.data.remove_if(key, |_, (_, expiry)| *expiry <= Instant::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<()> {
        self.data
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> GatewayResult<u64> {
        let now = Instant::now();
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| ("0".to_string(), now + ttl));

        let (value, expiry) = entry.value_mut();
        if *expiry <= now {
            // window elapsed; restart it
            *value = "0".to_string();
            *expiry = now + ttl;
        }
        let count: u64 = value.parse().unwrap_or(0) + 1;
        *value = count.to_string();
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> GatewayResult<Option<Duration>> {
        Ok(self.data.get(key).and_then(|entry| {
            let (_, expiry) = entry.value();
            expiry.checked_duration_since(Instant::now())
        }))
    }

    async fn ping(&self) -> GatewayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let store = InMemoryCacheStore::new();
        store
            .set("jsonapi:task:T1", r#"{"id":"T1"}"#, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            store.get("jsonapi:task:T1").await.unwrap().as_deref(),
            Some(r#"{"id":"T1"}"#)
        );
        assert!(store.get("jsonapi:task:T2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_miss() {
        let store = InMemoryCacheStore::new();
        store
            .set("key", "value", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incr_is_monotonic_within_window() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.incr("ratelimit:r:alice", ttl).await.unwrap(), 1);
        assert_eq!(store.incr("ratelimit:r:alice", ttl).await.unwrap(), 2);
        assert_eq!(store.incr("ratelimit:r:alice", ttl).await.unwrap(), 3);
        assert!(store.ttl("ratelimit:r:alice").await.unwrap().unwrap() <= ttl);
    }

    #[tokio::test]
    async fn test_incr_restarts_after_window() {
        let store = InMemoryCacheStore::new();
        let ttl = Duration::from_millis(10);

        assert_eq!(store.incr("key", ttl).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.incr("key", ttl).await.unwrap(), 1);
    }
}
