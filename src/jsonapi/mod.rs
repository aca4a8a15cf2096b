//! JSON:API response shaping: document model, field authorization, and
//! `include` resolution against the resource cache.

pub mod document;
pub mod processor;

pub use document::{
    JsonApiDocument, PrimaryData, Relationship, RelationshipData, ResourceIdentifier,
    ResourceObject,
};
pub use processor::JsonApiProcessor;
