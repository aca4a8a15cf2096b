//! Wire format of control-plane configuration events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authz::{FieldPolicyEntry, RoutePolicyEntry};
use crate::routing::RateLimitConfig;

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// Envelope common to every configuration event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigEvent<P> {
    /// Unique id of this event instance
    pub event_id: String,
    /// Event type discriminator as published by the control plane
    pub event_type: String,
    /// Correlation id linking the event to the control-plane operation
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: P,
}

/// A collection was created, updated, or deleted
///
/// Collections map one-to-one to gateway routes at `/api/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionChangedPayload {
    /// Collection id, stable across renames
    pub id: String,
    /// Collection name, which determines the route path
    pub name: String,
    /// Service the collection's backend belongs to
    pub service_id: String,
    pub change_type: ChangeType,
    /// Per-route rate limit override, if the collection declares one
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

/// The authorization policies of a collection were replaced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthzChangedPayload {
    pub collection_id: String,
    #[serde(default)]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub route_policies: Vec<RoutePolicyEntry>,
    #[serde(default)]
    pub field_policies: Vec<FieldPolicyEntry>,
}

/// A backend service was registered, moved, or removed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceChangedPayload {
    pub service_id: String,
    pub service_name: String,
    /// Base URL requests for this service's collections are forwarded to
    pub base_url: String,
    pub change_type: ChangeType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_event_deserializes_from_wire_form() {
        let wire = json!({
            "eventId": "evt-1",
            "eventType": "collection-changed",
            "correlationId": "op-7",
            "timestamp": "2024-05-01T12:00:00Z",
            "payload": {
                "id": "col-1",
                "name": "projects",
                "serviceId": "svc-1",
                "changeType": "CREATED",
                "rateLimit": {"requestsPerWindow": 100, "window": "1m"}
            }
        });

        let event: ConfigEvent<CollectionChangedPayload> =
            serde_json::from_value(wire).unwrap();
        assert_eq!(event.payload.name, "projects");
        assert_eq!(event.payload.change_type, ChangeType::Created);
        let limit = event.payload.rate_limit.unwrap();
        assert_eq!(limit.requests_per_window, 100);
        assert_eq!(limit.window, std::time::Duration::from_secs(60));
    }

    #[test]
    fn test_optional_fields_default() {
        let wire = json!({
            "eventId": "evt-2",
            "eventType": "authz-changed",
            "timestamp": "2024-05-01T12:00:00Z",
            "payload": {"collectionId": "col-1"}
        });

        let event: ConfigEvent<AuthzChangedPayload> = serde_json::from_value(wire).unwrap();
        assert!(event.correlation_id.is_none());
        assert!(event.payload.route_policies.is_empty());
        assert!(event.payload.field_policies.is_empty());
    }

    #[test]
    fn test_unknown_change_type_is_rejected() {
        let wire = json!({
            "serviceId": "svc-1",
            "serviceName": "projects-svc",
            "baseUrl": "http://projects:8080",
            "changeType": "ARCHIVED"
        });
        assert!(serde_json::from_value::<ServiceChangedPayload>(wire).is_err());
    }
}
