//! The NATS subscriber that applies configuration events to the live caches.
//!
//! Event application is idempotent and tolerant: a payload that fails to
//! deserialize, or a collection event whose service URL is unknown, is logged
//! and dropped without disturbing the current configuration. The subscription
//! loop reconnects with capped exponential backoff and reports its state
//! through [`ConsumerLiveness`].

use dashmap::DashMap;
use futures::StreamExt;
use metrics::counter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::authz::{AuthzConfig, AuthzConfigCache};
use crate::core::config::NatsSettings;
use crate::events::types::{
    AuthzChangedPayload, ChangeType, CollectionChangedPayload, ConfigEvent, ServiceChangedPayload,
};
use crate::observability::ConsumerLiveness;
use crate::routing::{RouteDefinition, RouteTable};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Capped exponential reconnect backoff with jitter
///
/// Resets to the initial delay once a connection has been established, so a
/// drop after hours of healthy streaming retries promptly instead of waiting
/// out a previously accumulated delay.
struct ReconnectBackoff {
    delay: Duration,
}

impl ReconnectBackoff {
    fn new() -> Self {
        Self {
            delay: BACKOFF_INITIAL,
        }
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_INITIAL;
    }

    /// The delay to sleep before the next attempt; doubles up to the cap
    fn next_delay(&mut self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.delay.as_millis() as u64 / 4);
        let delay = self.delay + Duration::from_millis(jitter_ms);
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
        delay
    }
}

/// Applies control-plane configuration events to the route table, the
/// authorization cache, and the service URL map
pub struct ConfigEventConsumer {
    route_table: Arc<RouteTable>,
    authz_cache: Arc<AuthzConfigCache>,
    service_urls: Arc<DashMap<String, String>>,
    liveness: Arc<ConsumerLiveness>,
    settings: NatsSettings,
}

impl ConfigEventConsumer {
    pub fn new(
        route_table: Arc<RouteTable>,
        authz_cache: Arc<AuthzConfigCache>,
        service_urls: Arc<DashMap<String, String>>,
        liveness: Arc<ConsumerLiveness>,
        settings: NatsSettings,
    ) -> Self {
        Self {
            route_table,
            authz_cache,
            service_urls,
            liveness,
            settings,
        }
    }

    /// Subscribe and apply events until the process shuts down
    ///
    /// Connection loss is not fatal: the gateway keeps serving from its
    /// current caches while this loop reconnects with backoff.
    pub async fn run(self: Arc<Self>) {
        let mut backoff = ReconnectBackoff::new();

        loop {
            match self.subscribe_and_consume().await {
                Ok(()) => {
                    // subscription streams only end when the connection drops;
                    // the connection did come up, so start backing off afresh
                    warn!("Event subscription ended; reconnecting");
                    backoff.reset();
                }
                Err(e) => {
                    error!(error = %e, "Event consumer failed; reconnecting");
                }
            }

            self.liveness.mark_disconnected();
            counter!("gateway_consumer_reconnects_total").increment(1);

            tokio::time::sleep(backoff.next_delay()).await;
        }
    }

    async fn subscribe_and_consume(&self) -> Result<(), async_nats::Error> {
        let client = async_nats::connect(&self.settings.url).await?;

        let mut collections = client
            .subscribe(self.settings.collection_subject.clone())
            .await?;
        let mut authz = client.subscribe(self.settings.authz_subject.clone()).await?;
        let mut services = client
            .subscribe(self.settings.service_subject.clone())
            .await?;

        self.liveness.mark_connected();
        info!(url = %self.settings.url, "Subscribed to configuration events");

        loop {
            tokio::select! {
                Some(message) = collections.next() => {
                    self.liveness.record_event();
                    self.apply_collection_event(&message.payload);
                }
                Some(message) = authz.next() => {
                    self.liveness.record_event();
                    self.apply_authz_event(&message.payload);
                }
                Some(message) = services.next() => {
                    self.liveness.record_event();
                    self.apply_service_event(&message.payload);
                }
                else => return Ok(()),
            }
        }
    }

    /// Apply a collection-changed event payload
    pub fn apply_collection_event(&self, payload: &[u8]) {
        let event: ConfigEvent<CollectionChangedPayload> = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed collection event");
                counter!("gateway_events_malformed_total", "subject" => "collection")
                    .increment(1);
                return;
            }
        };

        let collection = &event.payload;
        counter!("gateway_events_applied_total", "subject" => "collection").increment(1);

        match collection.change_type {
            ChangeType::Created | ChangeType::Updated => {
                let Some(backend) = self
                    .service_urls
                    .get(&collection.service_id)
                    .map(|url| url.value().clone())
                else {
                    warn!(
                        collection_id = %collection.id,
                        service_id = %collection.service_id,
                        "No known URL for collection's service; dropping route update"
                    );
                    return;
                };

                let route = RouteDefinition {
                    id: format!("route-{}", collection.name),
                    collection_id: collection.id.clone(),
                    service_id: collection.service_id.clone(),
                    path_prefix: format!("/api/{}", collection.name),
                    backend_base_url: backend,
                    rate_limit: collection.rate_limit.clone(),
                };
                info!(
                    collection_id = %collection.id,
                    path = %route.path_prefix,
                    "Applying collection route"
                );
                self.route_table.upsert(route);
            }
            ChangeType::Deleted => {
                info!(collection_id = %collection.id, "Removing collection route");
                self.route_table.remove(&collection.id);
                self.authz_cache.remove(&collection.id);
            }
        }
    }

    /// Apply an authz-changed event payload, replacing the collection's
    /// policies wholesale
    pub fn apply_authz_event(&self, payload: &[u8]) {
        let event: ConfigEvent<AuthzChangedPayload> = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed authz event");
                counter!("gateway_events_malformed_total", "subject" => "authz").increment(1);
                return;
            }
        };

        let authz = event.payload;
        counter!("gateway_events_applied_total", "subject" => "authz").increment(1);

        self.authz_cache.replace(AuthzConfig::from_entries(
            authz.collection_id,
            authz.route_policies,
            authz.field_policies,
        ));
    }

    /// Apply a service-changed event payload
    ///
    /// Existing routes keep their current backend URL until their collection
    /// is re-announced; a deleted service takes its routes down with it.
    pub fn apply_service_event(&self, payload: &[u8]) {
        let event: ConfigEvent<ServiceChangedPayload> = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed service event");
                counter!("gateway_events_malformed_total", "subject" => "service").increment(1);
                return;
            }
        };

        let service = &event.payload;
        counter!("gateway_events_applied_total", "subject" => "service").increment(1);

        match service.change_type {
            ChangeType::Created | ChangeType::Updated => {
                debug!(service_id = %service.service_id, url = %service.base_url, "Recording service URL");
                self.service_urls
                    .insert(service.service_id.clone(), service.base_url.clone());
            }
            ChangeType::Deleted => {
                let removed = self.route_table.remove_service(&service.service_id);
                self.service_urls.remove(&service.service_id);
                info!(
                    service_id = %service.service_id,
                    removed_routes = removed,
                    "Removed service and its routes"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn consumer() -> ConfigEventConsumer {
        ConfigEventConsumer::new(
            Arc::new(RouteTable::new()),
            Arc::new(AuthzConfigCache::new()),
            Arc::new(DashMap::new()),
            Arc::new(ConsumerLiveness::new()),
            NatsSettings::default(),
        )
    }

    fn collection_event(change_type: &str) -> Vec<u8> {
        json!({
            "eventId": "evt-1",
            "eventType": "collection-changed",
            "timestamp": "2024-05-01T12:00:00Z",
            "payload": {
                "id": "col-1",
                "name": "projects",
                "serviceId": "svc-1",
                "changeType": change_type
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut backoff = ReconnectBackoff::new();

        let first = backoff.next_delay();
        assert!(first >= BACKOFF_INITIAL);
        assert!(first <= BACKOFF_INITIAL + BACKOFF_INITIAL / 4);

        for _ in 0..10 {
            backoff.next_delay();
        }
        // a delay from a capped state never exceeds cap + jitter
        assert!(backoff.next_delay() <= BACKOFF_MAX + BACKOFF_MAX / 4);
    }

    #[test]
    fn test_backoff_resets_after_successful_connection() {
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..10 {
            backoff.next_delay();
        }

        backoff.reset();
        let after_reset = backoff.next_delay();
        assert!(after_reset <= BACKOFF_INITIAL + BACKOFF_INITIAL / 4);
    }

    #[test]
    fn test_collection_created_registers_route() {
        let consumer = consumer();
        consumer
            .service_urls
            .insert("svc-1".to_string(), "http://projects:8080".to_string());

        consumer.apply_collection_event(&collection_event("CREATED"));

        let route = consumer.route_table.lookup("/api/projects").unwrap();
        assert_eq!(route.collection_id, "col-1");
        assert_eq!(route.backend_base_url, "http://projects:8080");
    }

    #[test]
    fn test_collection_with_unknown_service_is_dropped() {
        let consumer = consumer();
        consumer.apply_collection_event(&collection_event("CREATED"));
        assert!(consumer.route_table.is_empty());
    }

    #[test]
    fn test_collection_deleted_removes_route_and_policies() {
        let consumer = consumer();
        consumer
            .service_urls
            .insert("svc-1".to_string(), "http://projects:8080".to_string());
        consumer.apply_collection_event(&collection_event("CREATED"));
        consumer
            .authz_cache
            .replace(AuthzConfig::from_entries("col-1", vec![], vec![]));

        consumer.apply_collection_event(&collection_event("DELETED"));

        assert!(consumer.route_table.lookup("/api/projects").is_none());
        assert!(consumer.authz_cache.get("col-1").is_none());
    }

    #[test]
    fn test_malformed_event_leaves_state_untouched() {
        let consumer = consumer();
        consumer
            .service_urls
            .insert("svc-1".to_string(), "http://projects:8080".to_string());
        consumer.apply_collection_event(&collection_event("CREATED"));

        consumer.apply_collection_event(b"{not json");
        consumer.apply_authz_event(b"{not json");
        consumer.apply_service_event(b"{not json");

        assert_eq!(consumer.route_table.len(), 1);
    }

    #[test]
    fn test_service_deleted_removes_its_routes() {
        let consumer = consumer();
        consumer
            .service_urls
            .insert("svc-1".to_string(), "http://projects:8080".to_string());
        consumer.apply_collection_event(&collection_event("CREATED"));

        let event = json!({
            "eventId": "evt-9",
            "eventType": "service-changed",
            "timestamp": "2024-05-01T12:00:00Z",
            "payload": {
                "serviceId": "svc-1",
                "serviceName": "projects-svc",
                "baseUrl": "http://projects:8080",
                "changeType": "DELETED"
            }
        });
        consumer.apply_service_event(event.to_string().as_bytes());

        assert!(consumer.route_table.is_empty());
        assert!(consumer.service_urls.is_empty());
    }

    #[test]
    fn test_authz_event_replaces_policies_wholesale() {
        let consumer = consumer();
        consumer.authz_cache.replace(AuthzConfig::from_entries(
            "col-1",
            vec![crate::authz::RoutePolicyEntry {
                method: "DELETE".to_string(),
                policy_id: "pol-old".to_string(),
                required_roles: vec!["admin".to_string()],
            }],
            vec![],
        ));

        let event = json!({
            "eventId": "evt-5",
            "eventType": "authz-changed",
            "timestamp": "2024-05-01T12:00:00Z",
            "payload": {
                "collectionId": "col-1",
                "fieldPolicies": [
                    {"field": "budget", "policyId": "pol-new", "requiredRoles": ["finance"]}
                ]
            }
        });
        consumer.apply_authz_event(event.to_string().as_bytes());

        let config = consumer.authz_cache.get("col-1").unwrap();
        assert!(config.route_policies.is_empty());
        assert!(config.field_policies.contains_key("budget"));
    }
}
