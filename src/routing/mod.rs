//! Dynamic route table: path-prefix routing metadata owned by the
//! configuration layer and read on every request.

pub mod table;

pub use table::{RateLimitConfig, RouteDefinition, RouteTable};
