//! Dependency health checks and the readiness gate.
//!
//! The gateway keeps serving from its in-memory caches when a dependency
//! drops out, so a failed dependency degrades the composite status rather
//! than making the gateway unhealthy. Readiness flips once startup completes
//! and never flips back.

use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::cache::CacheStore;
use crate::core::config::ControlPlaneSettings;

/// Liveness state written by the event consumer and read by health checks
#[derive(Debug, Default)]
pub struct ConsumerLiveness {
    connected: AtomicBool,
    last_event_unix: AtomicU64,
}

impl ConsumerLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record that an event was received just now
    pub fn record_event(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_event_unix.store(now, Ordering::Relaxed);
    }

    /// Unix timestamp of the last received event, if any
    pub fn last_event_unix(&self) -> Option<u64> {
        match self.last_event_unix.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }
}

/// Health of a single dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of probing one dependency
#[derive(Debug, Clone, Serialize)]
pub struct DependencyCheck {
    pub name: &'static str,
    pub status: DependencyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl DependencyCheck {
    fn healthy(name: &'static str, latency_ms: u64) -> Self {
        Self {
            name,
            status: DependencyStatus::Healthy,
            message: None,
            latency_ms: Some(latency_ms),
        }
    }

    fn unhealthy(name: &'static str, message: String) -> Self {
        Self {
            name,
            status: DependencyStatus::Unhealthy,
            message: Some(message),
            latency_ms: None,
        }
    }
}

/// Composite health report served at `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: DependencyStatus,
    pub checks: Vec<DependencyCheck>,
    pub timestamp: DateTime<Utc>,
}

/// Probes the gateway's dependencies on demand
pub struct HealthChecker {
    store: Arc<dyn CacheStore>,
    liveness: Arc<ConsumerLiveness>,
    control_plane: ControlPlaneSettings,
    client: HttpClient,
    ready: AtomicBool,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn CacheStore>,
        liveness: Arc<ConsumerLiveness>,
        control_plane: ControlPlaneSettings,
    ) -> Self {
        Self {
            store,
            liveness,
            control_plane,
            client: HttpClient::new(),
            ready: AtomicBool::new(false),
        }
    }

    /// Flip the readiness gate after startup completes
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Probe all dependencies and build the composite report
    pub async fn check(&self) -> HealthReport {
        let checks = vec![
            self.check_cache().await,
            self.check_consumer(),
            self.check_control_plane().await,
        ];

        let status = if checks
            .iter()
            .all(|check| check.status == DependencyStatus::Healthy)
        {
            DependencyStatus::Healthy
        } else {
            DependencyStatus::Degraded
        };

        HealthReport {
            status,
            checks,
            timestamp: Utc::now(),
        }
    }

    async fn check_cache(&self) -> DependencyCheck {
        let started = Instant::now();
        match self.store.ping().await {
            Ok(()) => DependencyCheck::healthy("cache", started.elapsed().as_millis() as u64),
            Err(e) => DependencyCheck::unhealthy("cache", e.to_string()),
        }
    }

    fn check_consumer(&self) -> DependencyCheck {
        if self.liveness.is_connected() {
            let message = self.liveness.last_event_unix().map(|ts| {
                let age = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs().saturating_sub(ts))
                    .unwrap_or(0);
                format!("last event {}s ago", age)
            });
            DependencyCheck {
                name: "event-consumer",
                status: DependencyStatus::Healthy,
                message,
                latency_ms: None,
            }
        } else {
            DependencyCheck::unhealthy(
                "event-consumer",
                "not connected to the event bus".to_string(),
            )
        }
    }

    async fn check_control_plane(&self) -> DependencyCheck {
        let url = format!(
            "{}{}",
            self.control_plane.url.trim_end_matches('/'),
            self.control_plane.health_path
        );
        let started = Instant::now();
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                DependencyCheck::healthy("control-plane", started.elapsed().as_millis() as u64)
            }
            Ok(response) => DependencyCheck::unhealthy(
                "control-plane",
                format!("health endpoint returned {}", response.status()),
            ),
            Err(e) => DependencyCheck::unhealthy("control-plane", e.to_string()),
        }
    }
}
