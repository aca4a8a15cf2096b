//! # Rate Limiter
//!
//! Fixed-window rate limiting over the shared cache store, keyed per
//! (route, principal) pair.
//!
//! Algorithm:
//! 1. Atomically increment the counter at `ratelimit:{routeId}:{principal}`
//! 2. If the post-increment value is 1, the store sets the key's expiry to
//!    the window duration — that establishes the fixed window
//! 3. If the value exceeds the configured limit, the request is denied with
//!    `retry_after` set to the key's remaining TTL
//! 4. Otherwise the request is allowed with `remaining = limit - value`
//!
//! The store is the source of truth; there is no in-process counter state and
//! no explicit reset path — windows self-expire. If the store is unreachable
//! the limiter fails open: the request proceeds, a warning is logged, and no
//! rate-limit headers are attached.

use metrics::counter;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::routing::RateLimitConfig;

const KEY_PREFIX: &str = "ratelimit:";

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured maximum requests per window
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the window resets
    pub reset_at: u64,
    /// How long a denied caller should wait before retrying
    pub retry_after: Option<Duration>,
}

/// Cache-store-backed fixed-window rate limiter
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Check the limit for one request
    ///
    /// Returns `None` when the store is unreachable — the fail-open case.
    pub async fn check(
        &self,
        route_id: &str,
        principal_key: &str,
        config: &RateLimitConfig,
    ) -> Option<RateLimitDecision> {
        let key = build_key(route_id, principal_key);

        let count = match self.store.incr(&key, config.window).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    route_id,
                    principal = principal_key,
                    error = %e,
                    "Cache store unreachable during rate limit check; failing open"
                );
                counter!("gateway_ratelimit_fail_open_total").increment(1);
                return None;
            }
        };

        // Remaining TTL bounds the reset timestamp; on a TTL read failure the
        // full window is a safe upper bound.
        let ttl = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => ttl,
            _ => config.window,
        };
        let reset_at = unix_now() + ttl.as_secs();

        let limit = config.requests_per_window;
        if count > u64::from(limit) {
            debug!(route_id, principal = principal_key, count, limit, "Rate limit exceeded");
            counter!("gateway_ratelimit_denied_total").increment(1);
            Some(RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
                retry_after: Some(ttl),
            })
        } else {
            counter!("gateway_ratelimit_allowed_total").increment(1);
            Some(RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - count as u32,
                reset_at,
                retry_after: None,
            })
        }
    }
}

fn build_key(route_id: &str, principal_key: &str) -> String {
    format!("{}{}:{}", KEY_PREFIX, route_id, principal_key)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::core::error::{GatewayError, GatewayResult};
    use async_trait::async_trait;

    fn config(limit: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: limit,
            window: Duration::from_secs(window_secs),
        }
    }

    #[tokio::test]
    async fn test_requests_within_limit_decrement_remaining() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCacheStore::new()));
        let config = config(3, 60);

        for expected_remaining in [2u32, 1, 0] {
            let decision = limiter.check("route-1", "alice", &config).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.limit, 3);
            assert_eq!(decision.remaining, expected_remaining);
            assert!(decision.retry_after.is_none());
        }
    }

    #[tokio::test]
    async fn test_request_over_limit_denied_with_retry_after() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCacheStore::new()));
        let config = config(3, 60);

        for _ in 0..3 {
            limiter.check("route-1", "alice", &config).await.unwrap();
        }
        let decision = limiter.check("route-1", "alice", &config).await.unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        let retry_after = decision.retry_after.unwrap();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(60));
        assert!(decision.reset_at > unix_now());
    }

    #[tokio::test]
    async fn test_counters_are_independent_per_route_and_principal() {
        let limiter = RateLimiter::new(Arc::new(InMemoryCacheStore::new()));
        let config = config(1, 60);

        assert!(limiter.check("route-1", "alice", &config).await.unwrap().allowed);
        assert!(limiter.check("route-2", "alice", &config).await.unwrap().allowed);
        assert!(limiter.check("route-1", "bob", &config).await.unwrap().allowed);
        assert!(!limiter.check("route-1", "alice", &config).await.unwrap().allowed);
    }

    /// A store whose every operation fails, to exercise fail-open
    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> GatewayResult<Option<String>> {
            Err(GatewayError::cache_store("connection refused"))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> GatewayResult<()> {
            Err(GatewayError::cache_store("connection refused"))
        }
        async fn incr(&self, _key: &str, _ttl: Duration) -> GatewayResult<u64> {
            Err(GatewayError::cache_store("connection refused"))
        }
        async fn ttl(&self, _key: &str) -> GatewayResult<Option<Duration>> {
            Err(GatewayError::cache_store("connection refused"))
        }
        async fn ping(&self) -> GatewayResult<()> {
            Err(GatewayError::cache_store("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        let decision = limiter.check("route-1", "alice", &config(1, 60)).await;
        assert!(decision.is_none());
    }
}
