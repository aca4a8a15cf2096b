//! # Cache Store
//!
//! Abstraction over the external cache store shared by the rate limiter
//! (counters) and the JSON:API processor (resource cache). Two backends:
//! Redis for deployment and an in-memory store for tests and local runs.
//!
//! The store is an independently-failing dependency: callers are expected to
//! degrade gracefully on `Err` (fail open for rate limiting, omit included
//! resources for the processor) rather than propagate the failure.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::Duration;

use crate::core::error::GatewayResult;

pub use self::memory::InMemoryCacheStore;
pub use self::redis::RedisCacheStore;

/// Storage backend operations needed by the gateway
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value at a key, `None` on a miss
    async fn get(&self, key: &str) -> GatewayResult<Option<String>>;

    /// Store a value with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<()>;

    /// Atomically increment the counter at a key
    ///
    /// When the post-increment value is 1 the key's expiry is set to `ttl`,
    /// establishing a fixed window. Subsequent increments leave the expiry
    /// untouched.
    async fn incr(&self, key: &str, ttl: Duration) -> GatewayResult<u64>;

    /// Remaining time-to-live of a key, `None` when absent or persistent
    async fn ttl(&self, key: &str) -> GatewayResult<Option<Duration>>;

    /// Liveness probe for health reporting
    async fn ping(&self) -> GatewayResult<()>;
}
