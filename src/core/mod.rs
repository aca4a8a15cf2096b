//! Core building blocks: error types and gateway configuration.

pub mod config;
pub mod error;
