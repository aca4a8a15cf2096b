//! # Configuration Events
//!
//! NATS-driven hot reload of routes, authorization policies, and service
//! locations. The control plane publishes a change event per entity; the
//! consumer applies each one to the in-memory caches without restarting or
//! pausing request handling.

pub mod consumer;
pub mod types;

pub use consumer::ConfigEventConsumer;
pub use types::{
    AuthzChangedPayload, ChangeType, CollectionChangedPayload, ConfigEvent, ServiceChangedPayload,
};
