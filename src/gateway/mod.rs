//! # Gateway
//!
//! The HTTP server and the request pipeline: authenticate, route, rate
//! limit, authorize, forward, and shape the response.

pub mod pipeline;
pub mod server;

pub use server::{AppState, GatewayServer};
