//! # JSON:API Processor
//!
//! Turns a raw backend response plus an optional `include` query parameter
//! into a client-ready JSON:API document:
//!
//! 1. Parse the body into a [`JsonApiDocument`]
//! 2. Apply field authorization to every resource in `data`
//! 3. Resolve `include` by looking up related resources in the resource
//!    cache at `jsonapi:{type}:{id}`
//! 4. Emit the document with `included` omitted when empty
//!
//! The resource cache is written by the backend services on create/update;
//! the gateway only reads it. A cache miss or store failure is not an error —
//! the related resource is simply omitted from `included`. Unknown
//! relationship names in `include` are silently ignored.
//!
//! Each dot-separated include path is resolved independently, one level at a
//! time, bounded at [`MAX_INCLUDE_DEPTH`]; emitted resources are
//! deduplicated by `(type, id)`, and the depth bound keeps cyclic
//! relationship graphs from walking forever.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::authz::AuthzConfig;
use crate::cache::CacheStore;
use crate::core::error::GatewayResult;
use crate::jsonapi::document::{JsonApiDocument, ResourceIdentifier, ResourceObject};

const RESOURCE_KEY_PREFIX: &str = "jsonapi:";

/// Maximum depth of dot-separated nested include paths
pub const MAX_INCLUDE_DEPTH: usize = 3;

/// Response post-processor backed by the shared resource cache
pub struct JsonApiProcessor {
    store: Arc<dyn CacheStore>,
}

impl JsonApiProcessor {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Process a successful backend body into a client-ready document
    pub async fn process(
        &self,
        body: &[u8],
        include: Option<&str>,
        authz: Option<&AuthzConfig>,
        principal: &Principal,
    ) -> GatewayResult<JsonApiDocument> {
        let mut doc = JsonApiDocument::parse(body)?;

        if let Some(data) = doc.data.as_mut() {
            for resource in data.resources_mut() {
                filter_attributes(resource, authz, principal);
            }
        }
        // a backend may compound its own included resources; they are subject
        // to the same field policies
        for resource in doc.included.iter_mut() {
            filter_attributes(resource, authz, principal);
        }

        if let Some(include) = include {
            let resolved = self.resolve_includes(&doc, include, authz, principal).await;
            doc.included.extend(resolved);
        }

        Ok(doc)
    }

    /// Resolve the `include` parameter against the resource cache
    ///
    /// Each comma-separated path is walked independently, level by level:
    /// segment N matches only against the relationships of resources reached
    /// via that path's segment N-1 (level 0 being the primary data), so
    /// `tasks.assignee,reviews` never resolves the assignee of a review.
    /// Identifiers already emitted — including the primary resources and
    /// anything the backend compounded itself — are skipped.
    async fn resolve_includes(
        &self,
        doc: &JsonApiDocument,
        include: &str,
        authz: Option<&AuthzConfig>,
        principal: &Principal,
    ) -> Vec<ResourceObject> {
        let paths: Vec<Vec<&str>> = include
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| p.split('.').collect())
            .collect();
        if paths.is_empty() {
            return Vec::new();
        }

        let primary: Vec<&ResourceObject> = match &doc.data {
            Some(data) => data.resources(),
            None => return Vec::new(),
        };

        let mut seen: HashSet<ResourceIdentifier> =
            primary.iter().map(|r| r.identifier()).collect();
        seen.extend(doc.included.iter().map(|r| r.identifier()));
        let mut included: Vec<ResourceObject> = Vec::new();

        for path in &paths {
            let mut frontier: Vec<ResourceObject> =
                primary.iter().map(|r| (*r).clone()).collect();

            for segment in path.iter().take(MAX_INCLUDE_DEPTH) {
                if frontier.is_empty() {
                    break;
                }

                let mut level: HashSet<ResourceIdentifier> = HashSet::new();
                let mut wanted: Vec<ResourceIdentifier> = Vec::new();
                for resource in &frontier {
                    for identifier in match_relationship(resource, segment) {
                        if level.insert(identifier.clone()) {
                            wanted.push(identifier);
                        }
                    }
                }

                let lookups = wanted.iter().map(|identifier| self.fetch(identifier));
                let fetched: Vec<ResourceObject> = join_all(lookups)
                    .await
                    .into_iter()
                    .flatten()
                    .collect();

                for resource in &fetched {
                    if seen.insert(resource.identifier()) {
                        let mut resource = resource.clone();
                        filter_attributes(&mut resource, authz, principal);
                        included.push(resource);
                    }
                }
                frontier = fetched;
            }
        }

        included
    }

    /// Fetch one related resource from the cache, tolerating misses and
    /// store failures
    async fn fetch(&self, identifier: &ResourceIdentifier) -> Option<ResourceObject> {
        let key = format!(
            "{}{}:{}",
            RESOURCE_KEY_PREFIX, identifier.resource_type, identifier.id
        );

        let value = match self.store.get(&key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(%key, "Resource cache miss; omitting from included");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "Resource cache unreachable; omitting from included");
                return None;
            }
        };

        match serde_json::from_str::<ResourceObject>(&value) {
            Ok(resource) => Some(resource),
            Err(e) => {
                warn!(%key, error = %e, "Cached resource is not a valid resource object; omitting");
                None
            }
        }
    }
}

/// Identifiers linked by the relationship the include name refers to
///
/// Matching stages: exact relationship key, then case-insensitive key, then
/// by the target `type` of a relationship's identifiers (so `include=tasks`
/// resolves a relationship keyed `task_ids` whose targets are of type
/// `tasks`). An include name matching nothing yields no identifiers and no
/// error.
fn match_relationship(resource: &ResourceObject, name: &str) -> Vec<ResourceIdentifier> {
    if let Some(relationship) = resource.relationships.get(name) {
        return relationship.identifiers().into_iter().cloned().collect();
    }

    if let Some((_, relationship)) = resource
        .relationships
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
    {
        return relationship.identifiers().into_iter().cloned().collect();
    }

    resource
        .relationships
        .values()
        .flat_map(|relationship| relationship.identifiers())
        .filter(|identifier| identifier.resource_type == name)
        .cloned()
        .collect()
}

/// Strip every attribute whose field policy the principal does not satisfy
fn filter_attributes(
    resource: &mut ResourceObject,
    authz: Option<&AuthzConfig>,
    principal: &Principal,
) {
    let config = match authz {
        Some(config) => config,
        None => return,
    };
    resource
        .attributes
        .retain(|field, _| config.field_allowed(field, principal));
}
