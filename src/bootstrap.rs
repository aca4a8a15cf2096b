//! # Bootstrap
//!
//! Initial configuration load from the control plane at startup.
//!
//! The static `/control` route is registered before anything else so the
//! control plane stays reachable through the gateway even when the bootstrap
//! fetch fails. A failed fetch degrades the gateway to an empty dynamic
//! configuration instead of aborting startup; the event consumer fills the
//! caches back in as the control plane publishes changes.

use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::authz::{AuthzConfig, AuthzConfigCache, FieldPolicyEntry, RoutePolicyEntry};
use crate::core::config::ControlPlaneSettings;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::{RouteDefinition, RouteTable};

/// Collection id of the built-in control plane route
pub const CONTROL_COLLECTION_ID: &str = "__control-plane";

/// One backend service in the bootstrap snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub service_id: String,
    pub base_url: String,
}

/// Authorization policies of one collection in the bootstrap snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthzEntry {
    pub collection_id: String,
    #[serde(default)]
    pub route_policies: Vec<RoutePolicyEntry>,
    #[serde(default)]
    pub field_policies: Vec<FieldPolicyEntry>,
}

/// Full configuration snapshot served by the control plane
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapSnapshot {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
    #[serde(default)]
    pub authz_configs: Vec<AuthzEntry>,
}

/// Fetches the bootstrap snapshot and seeds the in-memory caches
pub struct BootstrapLoader {
    client: reqwest::Client,
    settings: ControlPlaneSettings,
}

impl BootstrapLoader {
    pub fn new(settings: ControlPlaneSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Register the static control route and load the dynamic configuration
    ///
    /// Returns the number of routes loaded; a fetch failure logs and returns
    /// zero rather than erroring, leaving the gateway serving the control
    /// route only.
    pub async fn load(
        &self,
        route_table: &RouteTable,
        authz_cache: &AuthzConfigCache,
        service_urls: &DashMap<String, String>,
    ) -> usize {
        self.register_control_route(route_table);

        match self.fetch_snapshot().await {
            Ok(snapshot) => self.apply_snapshot(snapshot, route_table, authz_cache, service_urls),
            Err(e) => {
                error!(
                    error = %e,
                    "Bootstrap fetch failed; starting with control route only"
                );
                0
            }
        }
    }

    /// The control plane must stay reachable through the gateway regardless
    /// of the dynamic configuration
    fn register_control_route(&self, route_table: &RouteTable) {
        route_table.upsert(RouteDefinition {
            id: "route-control".to_string(),
            collection_id: CONTROL_COLLECTION_ID.to_string(),
            service_id: CONTROL_COLLECTION_ID.to_string(),
            path_prefix: "/control".to_string(),
            backend_base_url: self.settings.url.clone(),
            rate_limit: None,
        });
    }

    async fn fetch_snapshot(&self) -> GatewayResult<BootstrapSnapshot> {
        let url = format!(
            "{}{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.bootstrap_path
        );
        info!(%url, "Fetching bootstrap configuration");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::config(format!("bootstrap request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::config(format!(
                "bootstrap endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<BootstrapSnapshot>()
            .await
            .map_err(|e| GatewayError::config(format!("bootstrap payload invalid: {}", e)))
    }

    fn apply_snapshot(
        &self,
        snapshot: BootstrapSnapshot,
        route_table: &RouteTable,
        authz_cache: &AuthzConfigCache,
        service_urls: &DashMap<String, String>,
    ) -> usize {
        for service in snapshot.services {
            service_urls.insert(service.service_id, service.base_url);
        }

        let mut loaded = 0;
        for route in snapshot.routes {
            route_table.upsert(route);
            loaded += 1;
        }

        for entry in snapshot.authz_configs {
            authz_cache.replace(AuthzConfig::from_entries(
                entry.collection_id,
                entry.route_policies,
                entry.field_policies,
            ));
        }

        info!(
            routes = loaded,
            services = service_urls.len(),
            authz_configs = authz_cache.len(),
            "Bootstrap configuration applied"
        );
        loaded
    }
}
