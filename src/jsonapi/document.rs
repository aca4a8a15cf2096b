//! # JSON:API Document Model
//!
//! Serde types for the JSON:API convention: primary data under `data`,
//! related resources fetched alongside under `included`, each resource
//! carrying `type`/`id`/`attributes`/`relationships`.
//!
//! Serialization is minimal: empty `included`, `attributes`, and
//! `relationships` members are omitted entirely rather than emitted as empty
//! containers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::core::error::{GatewayError, GatewayResult};

/// A `{type, id}` pair referencing a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }
}

/// Linkage data of a relationship: to-one or to-many
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    One(ResourceIdentifier),
    Many(Vec<ResourceIdentifier>),
}

/// A named relationship on a resource object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RelationshipData>,
}

impl Relationship {
    /// All identifiers this relationship links to
    pub fn identifiers(&self) -> Vec<&ResourceIdentifier> {
        match &self.data {
            Some(RelationshipData::One(identifier)) => vec![identifier],
            Some(RelationshipData::Many(identifiers)) => identifiers.iter().collect(),
            None => Vec::new(),
        }
    }
}

/// One resource: `type`, `id`, attributes, and relationships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub relationships: HashMap<String, Relationship>,
}

impl ResourceObject {
    /// This resource's own identifier
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(self.resource_type.clone(), self.id.clone())
    }
}

/// Primary data: a single resource or a collection of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    One(ResourceObject),
    Many(Vec<ResourceObject>),
}

impl PrimaryData {
    /// Borrow every primary resource
    pub fn resources(&self) -> Vec<&ResourceObject> {
        match self {
            Self::One(resource) => vec![resource],
            Self::Many(resources) => resources.iter().collect(),
        }
    }

    /// Mutably borrow every primary resource
    pub fn resources_mut(&mut self) -> Vec<&mut ResourceObject> {
        match self {
            Self::One(resource) => vec![resource],
            Self::Many(resources) => resources.iter_mut().collect(),
        }
    }
}

/// A complete JSON:API document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JsonApiDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrimaryData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

impl JsonApiDocument {
    /// Parse a backend response body
    ///
    /// A body that is not valid JSON:API is a backend error surfaced to the
    /// error handler, never swallowed.
    pub fn parse(body: &[u8]) -> GatewayResult<Self> {
        let doc: Self =
            serde_json::from_slice(body).map_err(|e| GatewayError::BadBackendResponse {
                detail: format!("backend body is not a JSON:API document: {}", e),
            })?;

        // a document must carry at least one of `data`, `errors`, or `meta`;
        // arbitrary JSON would otherwise deserialize into an empty document
        // and erase the backend body on re-serialization
        if doc.data.is_none() && doc.errors.is_none() && doc.meta.is_none() {
            return Err(GatewayError::BadBackendResponse {
                detail: "backend body is not a JSON:API document: no data, errors, or meta member"
                    .to_string(),
            });
        }

        Ok(doc)
    }
}
