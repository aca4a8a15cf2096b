//! # Authorization
//!
//! Route-level and field-level authorization policies per collection, held in
//! a concurrent cache that the configuration event consumer replaces
//! wholesale and the request pipeline reads without locking.
//!
//! Policy evaluation is pure: the same (config snapshot, method or field,
//! principal) always yields the same decision, so a snapshot taken at the
//! start of a request stays valid for its whole lifetime even while the
//! consumer publishes a replacement.

use axum::http::Method;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::auth::Principal;

/// A reference to one policy: the set of roles that satisfy it
///
/// OR semantics: a principal needs at least one of the required roles. An
/// empty role set is unsatisfiable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRef {
    /// Identifier of the policy in the control plane
    pub policy_id: String,
    /// Roles of which the principal must hold at least one
    pub required_roles: HashSet<String>,
}

impl PolicyRef {
    /// Whether the principal satisfies this policy
    pub fn satisfied_by(&self, principal: &Principal) -> bool {
        principal.has_any_role(&self.required_roles)
    }
}

/// Wire form of a route policy as carried by authz events and bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePolicyEntry {
    /// HTTP method the policy gates, e.g. `GET`
    pub method: String,
    pub policy_id: String,
    #[serde(default)]
    pub required_roles: Vec<String>,
}

/// Wire form of a field policy as carried by authz events and bootstrap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPolicyEntry {
    /// Attribute name the policy gates
    pub field: String,
    pub policy_id: String,
    #[serde(default)]
    pub required_roles: Vec<String>,
}

/// The complete authorization configuration for one collection
///
/// Replaced atomically per collection — a reader never sees a collection with
/// route policies from one update and field policies from another.
#[derive(Debug, Clone, Default)]
pub struct AuthzConfig {
    pub collection_id: String,
    /// Route policies keyed by uppercase HTTP method name
    pub route_policies: HashMap<String, PolicyRef>,
    /// Field policies keyed by attribute name
    pub field_policies: HashMap<String, PolicyRef>,
}

impl AuthzConfig {
    /// Build a config from its wire form
    pub fn from_entries(
        collection_id: impl Into<String>,
        route_policies: Vec<RoutePolicyEntry>,
        field_policies: Vec<FieldPolicyEntry>,
    ) -> Self {
        let route_policies = route_policies
            .into_iter()
            .map(|entry| {
                (
                    entry.method.to_ascii_uppercase(),
                    PolicyRef {
                        policy_id: entry.policy_id,
                        required_roles: entry.required_roles.into_iter().collect(),
                    },
                )
            })
            .collect();
        let field_policies = field_policies
            .into_iter()
            .map(|entry| {
                (
                    entry.field,
                    PolicyRef {
                        policy_id: entry.policy_id,
                        required_roles: entry.required_roles.into_iter().collect(),
                    },
                )
            })
            .collect();

        Self {
            collection_id: collection_id.into(),
            route_policies,
            field_policies,
        }
    }

    /// Route authorization: absence of a policy for the method means allow
    pub fn route_allowed(&self, method: &Method, principal: &Principal) -> bool {
        match self.route_policies.get(method.as_str()) {
            Some(policy) => policy.satisfied_by(principal),
            None => true,
        }
    }

    /// Field authorization: fields with no policy are always retained
    pub fn field_allowed(&self, field: &str, principal: &Principal) -> bool {
        match self.field_policies.get(field) {
            Some(policy) => policy.satisfied_by(principal),
            None => true,
        }
    }
}

/// Route authorization against an optional collection config
///
/// A collection with no cached config at all is default-allow.
pub fn route_allowed(config: Option<&AuthzConfig>, method: &Method, principal: &Principal) -> bool {
    match config {
        Some(config) => config.route_allowed(method, principal),
        None => true,
    }
}

/// Field authorization against an optional collection config
pub fn field_allowed(config: Option<&AuthzConfig>, field: &str, principal: &Principal) -> bool {
    match config {
        Some(config) => config.field_allowed(field, principal),
        None => true,
    }
}

/// Concurrent cache of per-collection authorization configs
///
/// Same sharing model as the route table: whole-`Arc` replacement per
/// collection, many concurrent readers, a single writing consumer task.
#[derive(Debug, Default)]
pub struct AuthzConfigCache {
    configs: DashMap<String, Arc<AuthzConfig>>,
}

impl AuthzConfigCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
        }
    }

    /// Atomically replace the full config for a collection
    pub fn replace(&self, config: AuthzConfig) {
        let collection_id = config.collection_id.clone();
        self.configs.insert(collection_id.clone(), Arc::new(config));
        info!(%collection_id, "Replaced authorization config");
    }

    /// Snapshot of the config for a collection, if any
    pub fn get(&self, collection_id: &str) -> Option<Arc<AuthzConfig>> {
        self.configs
            .get(collection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the config for a collection
    pub fn remove(&self, collection_id: &str) {
        if self.configs.remove(collection_id).is_some() {
            info!(%collection_id, "Removed authorization config");
        }
    }

    /// Number of collections with a cached config
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
