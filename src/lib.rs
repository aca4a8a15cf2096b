//! # JSON:API Gateway - Core Library Crate
//!
//! An API gateway for JSON:API microservices. It authenticates JWT bearer
//! tokens, enforces route- and field-level role policies, rate limits per
//! route and principal through a shared cache store, forwards requests to
//! collection backends, and shapes successful responses by resolving
//! JSON:API `include` parameters from a shared resource cache.
//!
//! Routes and policies are not static: a control plane publishes
//! configuration events over NATS and the gateway applies them to its
//! in-memory caches without restarting.

/// Error types and configuration loading
pub mod core;

/// JWT validation and principal extraction
pub mod auth;

/// Route- and field-level authorization policies
pub mod authz;

/// The dynamic route table
pub mod routing;

/// NATS configuration event consumer
pub mod events;

/// Initial configuration load from the control plane
pub mod bootstrap;

/// Cache store abstraction over Redis with an in-memory stand-in
pub mod cache;

/// Fixed-window rate limiting
pub mod ratelimit;

/// JSON:API document model and response post-processing
pub mod jsonapi;

/// Request forwarding to collection backends
pub mod proxy;

/// HTTP server and the request pipeline
pub mod gateway;

/// Health reporting and consumer liveness
pub mod observability;

// Commonly used types, importable from the crate root
pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use gateway::{AppState, GatewayServer};
pub use routing::{RouteDefinition, RouteTable};
