//! # Observability
//!
//! Health and readiness reporting for the gateway's dependencies, plus the
//! liveness state the event consumer shares with the health checker.

pub mod health;

pub use health::{
    ConsumerLiveness, DependencyCheck, DependencyStatus, HealthChecker, HealthReport,
};
