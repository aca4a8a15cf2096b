//! # Configuration Module
//!
//! This module handles the gateway's static configuration: the listener, the
//! control plane, the cache store, the message broker, token validation, and
//! the upstream timeout. It is loaded once at startup from a YAML file with
//! environment variable overrides for deployment-specific values.
//!
//! The *dynamic* configuration (routes and authorization policies) does not
//! live here — it is owned by [`crate::routing::RouteTable`] and
//! [`crate::authz::AuthzConfigCache`] and mutated at runtime by the
//! configuration event consumer.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};

/// Main gateway configuration structure
///
/// Deserialized from YAML with serde. Every section has sane defaults so a
/// minimal config file (or none at all in tests) is enough to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address and port)
    pub server: ServerSettings,

    /// Control plane location for bootstrap and health probing
    pub control_plane: ControlPlaneSettings,

    /// Redis cache store (rate limiting + resource cache)
    pub redis: RedisSettings,

    /// NATS message broker for configuration-change events
    pub nats: NatsSettings,

    /// Token validation settings
    pub auth: AuthSettings,

    /// Upstream forwarding settings
    pub upstream: UpstreamSettings,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind the HTTP listener to
    pub bind_address: String,
    /// Port for client-facing traffic (health and metrics share it)
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    /// Base URL of the control plane service
    pub url: String,
    /// Path of the bootstrap snapshot endpoint, relative to `url`
    pub bootstrap_path: String,
    /// Path probed by the health checker, relative to `url`
    pub health_path: String,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            bootstrap_path: "/control/bootstrap".to_string(),
            health_path: "/control/health".to_string(),
        }
    }
}

/// Redis settings for the shared cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// NATS settings for the configuration event consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    /// NATS server URL
    pub url: String,
    /// Subject carrying collection-changed events
    pub collection_subject: String,
    /// Subject carrying authorization-changed events
    pub authz_subject: String,
    /// Subject carrying service-changed events
    pub service_subject: String,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            collection_subject: "config.collection-changed".to_string(),
            authz_subject: "config.authz-changed".to_string(),
            service_subject: "config.service-changed".to_string(),
        }
    }
}

/// Token validation settings
///
/// Exactly one of `hs256_secret` or `rs256_public_key_pem` must be set;
/// `validate()` enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared secret for HS256-signed tokens (development / tests)
    pub hs256_secret: Option<String>,
    /// PEM-encoded RSA public key for RS256-signed tokens (production)
    pub rs256_public_key_pem: Option<String>,
    /// Dot-separated path of the claim carrying the principal's roles
    pub roles_claim: String,
    /// Proxied paths exempt from authentication (exact match)
    pub exempt_paths: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            hs256_secret: None,
            rs256_public_key_pem: None,
            roles_claim: "roles".to_string(),
            exempt_paths: vec!["/control/bootstrap".to_string()],
        }
    }
}

/// Upstream forwarding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Fixed timeout for backend calls; expiry surfaces as 504
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum request body size accepted from clients, in bytes
    pub max_request_size: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_request_size: 10 * 1024 * 1024,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            control_plane: ControlPlaneSettings::default(),
            redis: RedisSettings::default(),
            nats: NatsSettings::default(),
            auth: AuthSettings::default(),
            upstream: UpstreamSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }
        if let Ok(url) = env::var("GATEWAY_CONTROL_PLANE_URL") {
            self.control_plane.url = url;
        }
        if let Ok(url) = env::var("GATEWAY_REDIS_URL") {
            self.redis.url = url;
        }
        if let Ok(url) = env::var("GATEWAY_NATS_URL") {
            self.nats.url = url;
        }
        if let Ok(secret) = env::var("GATEWAY_JWT_SECRET") {
            self.auth.hs256_secret = Some(secret);
        }
        if let Ok(timeout) = env::var("GATEWAY_UPSTREAM_TIMEOUT") {
            self.upstream.timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_UPSTREAM_TIMEOUT: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration, returning a descriptive error on the first problem
    pub fn validate(&self) -> GatewayResult<()> {
        Url::parse(&self.control_plane.url)
            .map_err(|e| GatewayError::config(format!("Invalid control plane URL: {}", e)))?;
        Url::parse(&self.redis.url)
            .map_err(|e| GatewayError::config(format!("Invalid Redis URL: {}", e)))?;

        if self.auth.hs256_secret.is_none() && self.auth.rs256_public_key_pem.is_none() {
            return Err(GatewayError::config(
                "Either auth.hs256_secret or auth.rs256_public_key_pem must be configured",
            ));
        }

        if self.upstream.timeout.is_zero() {
            return Err(GatewayError::config("upstream.timeout must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.hs256_secret = Some("test-secret".to_string());
        config
    }

    #[test]
    fn test_defaults_need_auth_material() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_err());
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_control_plane_url_rejected() {
        let mut config = minimal_config();
        config.control_plane.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9090
control_plane:
  url: "http://control-plane:8081"
auth:
  hs256_secret: "abc"
  roles_claim: "realm_access.roles"
upstream:
  timeout: "10s"
"#
        )
        .unwrap();

        let config = GatewayConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.control_plane.url, "http://control-plane:8081");
        assert_eq!(config.auth.roles_claim, "realm_access.roles");
        assert_eq!(config.upstream.timeout, Duration::from_secs(10));
        // unspecified sections fall back to defaults
        assert_eq!(config.nats.collection_subject, "config.collection-changed");
    }
}
