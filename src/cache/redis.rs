//! Redis-backed cache store.
//!
//! Uses a `ConnectionManager`, which multiplexes one connection and
//! reconnects on its own; cloning the manager is cheap and every operation
//! takes a clone so the store itself stays `&self`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::core::error::GatewayResult;

/// Cache store backed by Redis
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect to Redis at the given URL
    pub async fn connect(url: &str) -> GatewayResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> GatewayResult<u64> {
        let mut conn = self.manager.clone();
        let count: u64 = conn.incr(key, 1).await?;
        if count == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> GatewayResult<Option<Duration>> {
        let mut conn = self.manager.clone();
        let ttl: i64 = conn.ttl(key).await?;
        // -2 means the key is absent, -1 means no expiry
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(ttl as u64)))
        }
    }

    async fn ping(&self) -> GatewayResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
