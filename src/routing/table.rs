//! # Route Table
//!
//! Thread-safe in-memory table of route definitions, updated dynamically
//! through the startup bootstrap and configuration-change events while
//! requests read it concurrently.
//!
//! Routes are keyed by collection id; lookups match the request path against
//! registered path prefixes, longest prefix wins. Entries are stored as
//! `Arc<RouteDefinition>` and replaced wholesale, so a concurrent reader sees
//! either the old route or the new one, never a mix of fields from both.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Rate limit configuration attached to a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Maximum requests allowed per window
    pub requests_per_window: u32,
    /// Duration of the fixed rate-limiting window
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Routing metadata for one collection
///
/// Identity is `collection_id`: upserting a definition with the same
/// collection id replaces the previous one. `service_id` ties the route to
/// the backend service that owns it, so a service deletion can remove every
/// route pointing at that service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    /// Unique route identifier assigned by the control plane
    pub id: String,
    /// Collection this route serves; unique within the table
    pub collection_id: String,
    /// Backend service that owns the collection
    pub service_id: String,
    /// URL path prefix matched against incoming requests
    pub path_prefix: String,
    /// Base URL of the backend the request is forwarded to
    pub backend_base_url: String,
    /// Optional per-route rate limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

/// Concurrent, read-optimized route table
///
/// Many concurrent readers, occasional writers (the single configuration
/// event consumer task plus the bootstrap loader). No locking on the read
/// path: `DashMap` shards internally and values are whole-`Arc` replacements.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: DashMap<String, Arc<RouteDefinition>>,
}

impl RouteTable {
    /// Create an empty route table
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Insert or replace the route for a collection
    pub fn upsert(&self, route: RouteDefinition) {
        if route.path_prefix.is_empty() {
            warn!(
                collection_id = %route.collection_id,
                "Refusing to register route with empty path prefix"
            );
            return;
        }

        let collection_id = route.collection_id.clone();
        let previous = self.routes.insert(collection_id.clone(), Arc::new(route));
        match previous {
            Some(_) => info!(%collection_id, "Updated existing route"),
            None => info!(%collection_id, "Added new route"),
        }
    }

    /// Remove the route for a collection, returning it if present
    pub fn remove(&self, collection_id: &str) -> Option<Arc<RouteDefinition>> {
        let removed = self.routes.remove(collection_id).map(|(_, route)| route);
        if removed.is_some() {
            info!(%collection_id, "Removed route");
        }
        removed
    }

    /// Remove every route whose backend belongs to the given service
    ///
    /// Returns the number of routes removed.
    pub fn remove_service(&self, service_id: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.service_id != service_id);
        let removed = before.saturating_sub(self.routes.len());
        if removed > 0 {
            info!(%service_id, removed, "Removed routes for deleted service");
        }
        removed
    }

    /// Look up the route for a request path by longest-prefix match
    ///
    /// A prefix matches only on a path-segment boundary: `/api/tasks` matches
    /// `/api/tasks` and `/api/tasks/42` but not `/api/tasksearch`.
    pub fn lookup(&self, path: &str) -> Option<Arc<RouteDefinition>> {
        let mut best: Option<Arc<RouteDefinition>> = None;
        for entry in self.routes.iter() {
            let route = entry.value();
            if !prefix_matches(&route.path_prefix, path) {
                continue;
            }
            match &best {
                Some(current) if current.path_prefix.len() >= route.path_prefix.len() => {}
                _ => best = Some(Arc::clone(route)),
            }
        }
        best
    }

    /// Snapshot of all registered routes
    pub fn all(&self) -> Vec<Arc<RouteDefinition>> {
        self.routes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Prefix match on path-segment boundaries
fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(collection_id: &str, prefix: &str, backend: &str) -> RouteDefinition {
        RouteDefinition {
            id: format!("route-{}", collection_id),
            collection_id: collection_id.to_string(),
            service_id: format!("svc-{}", collection_id),
            path_prefix: prefix.to_string(),
            backend_base_url: backend.to_string(),
            rate_limit: None,
        }
    }

    #[test]
    fn test_lookup_exact_prefix() {
        let table = RouteTable::new();
        table.upsert(route("projects", "/api/projects", "http://projects:8080"));

        let found = table.lookup("/api/projects").unwrap();
        assert_eq!(found.collection_id, "projects");
        let found = table.lookup("/api/projects/P1").unwrap();
        assert_eq!(found.collection_id, "projects");
    }

    #[test]
    fn test_lookup_respects_segment_boundaries() {
        let table = RouteTable::new();
        table.upsert(route("tasks", "/api/tasks", "http://tasks:8080"));

        assert!(table.lookup("/api/tasksearch").is_none());
        assert!(table.lookup("/api/task").is_none());
        assert!(table.lookup("/api/tasks/T1/comments").is_some());
    }

    #[test]
    fn test_lookup_longest_prefix_wins() {
        let table = RouteTable::new();
        table.upsert(route("control", "/control", "http://control:8081"));
        table.upsert(route(
            "control-admin",
            "/control/admin",
            "http://admin:8082",
        ));

        assert_eq!(
            table.lookup("/control/admin/users").unwrap().collection_id,
            "control-admin"
        );
        assert_eq!(
            table.lookup("/control/bootstrap").unwrap().collection_id,
            "control"
        );
    }

    #[test]
    fn test_upsert_replaces_by_collection_id() {
        let table = RouteTable::new();
        table.upsert(route("projects", "/api/projects", "http://old:8080"));
        table.upsert(route("projects", "/api/projects", "http://new:8080"));

        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup("/api/projects").unwrap().backend_base_url,
            "http://new:8080"
        );
    }

    #[test]
    fn test_remove_service_drops_all_its_routes() {
        let table = RouteTable::new();
        let mut a = route("projects", "/api/projects", "http://svc:8080");
        a.service_id = "svc-1".to_string();
        let mut b = route("tasks", "/api/tasks", "http://svc:8080");
        b.service_id = "svc-1".to_string();
        let mut c = route("users", "/api/users", "http://other:8080");
        c.service_id = "svc-2".to_string();
        table.upsert(a);
        table.upsert(b);
        table.upsert(c);

        assert_eq!(table.remove_service("svc-1"), 2);
        assert!(table.lookup("/api/projects").is_none());
        assert!(table.lookup("/api/users").is_some());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let table = RouteTable::new();
        table.upsert(route("broken", "", "http://x"));
        assert!(table.is_empty());
    }

    /// Concurrent upserts of complete route values racing with lookups must
    /// never yield a route whose fields come from two different updates.
    #[tokio::test]
    async fn test_concurrent_upserts_never_tear() {
        let table = Arc::new(RouteTable::new());
        let mut initial = route("projects", "/api/projects", "http://v0:8080");
        initial.id = "route-v0".to_string();
        table.upsert(initial);

        let writer_table = Arc::clone(&table);
        let writer = tokio::spawn(async move {
            for i in 0..1000u32 {
                let mut r = route("projects", "/api/projects", &format!("http://v{}:8080", i));
                r.id = format!("route-v{}", i);
                writer_table.upsert(r);
            }
        });

        let reader_table = Arc::clone(&table);
        let reader = tokio::spawn(async move {
            for _ in 0..1000 {
                let found = reader_table.lookup("/api/projects/P1").unwrap();
                // id and backend URL are written together; they must agree
                let version = found
                    .backend_base_url
                    .trim_start_matches("http://v")
                    .trim_end_matches(":8080")
                    .to_string();
                assert_eq!(found.id, format!("route-v{}", version));
            }
        });

        writer.await.unwrap();
        reader.await.unwrap();
    }
}
