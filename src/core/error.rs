//! # Error Handling Module
//!
//! This module provides error handling for the gateway using the `thiserror` crate.
//! Every failure in the request pipeline is represented by a `GatewayError` variant
//! and mapped to a uniform JSON:API error envelope:
//!
//! ```json
//! {"errors":[{"status":"403","code":"FORBIDDEN","title":"...","detail":"...","source":{"pointer":"..."}}]}
//! ```
//!
//! Failures that belong to external dependencies (cache store, message broker) are
//! recovered locally with degraded functionality and never surface through this type
//! to a client; failures that are properties of the request itself always do.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
///
/// This is a type alias that makes error handling more ergonomic.
/// Instead of writing `Result<T, GatewayError>` everywhere, we can use `GatewayResult<T>`.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the API Gateway
///
/// Each variant represents a different category of failure with a fixed HTTP status
/// and stable error code. The `#[error("...")]` attribute from `thiserror`
/// implements the `Display` trait with the specified message.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No bearer token was present on a request that requires one
    #[error("Missing bearer token")]
    MissingToken,

    /// The bearer token failed signature or structural validation
    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    /// The bearer token's expiry has passed
    #[error("Token has expired")]
    ExpiredToken,

    /// The principal does not satisfy the route policy for the invoked method
    #[error("Forbidden: {detail}")]
    Forbidden { detail: String },

    /// No route in the route table matches the request path
    #[error("No route matches path: {path}")]
    RouteNotFound { path: String },

    /// The request body exceeds the configured size limit
    #[error("Request body exceeds {max_bytes} bytes")]
    PayloadTooLarge { max_bytes: usize },

    /// The rate limit for this (route, principal) pair was exceeded
    #[error("Rate limit exceeded: {limit} requests per window")]
    RateLimitExceeded { limit: u32, retry_after_secs: u64 },

    /// The backend returned a 2xx response whose body could not be parsed
    #[error("Bad backend response: {detail}")]
    BadBackendResponse { detail: String },

    /// The backend could not be reached at all
    #[error("Backend unavailable: {backend} - {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The backend call exceeded the upstream timeout
    #[error("Upstream timeout after {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// Cache store operation failed (rate limiting, resource cache)
    ///
    /// Never reaches a client: both consumers of the cache store degrade
    /// gracefully instead of propagating.
    #[error("Cache store error: {message}")]
    CacheStore { message: String },

    /// Configuration-related errors (invalid config file, missing keys, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid-token error with a custom reason
    pub fn invalid_token<S: Into<String>>(reason: S) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    /// Create a forbidden error with a custom detail message
    pub fn forbidden<S: Into<String>>(detail: S) -> Self {
        Self::Forbidden {
            detail: detail.into(),
        }
    }

    /// Create a cache store error with a custom message
    pub fn cache_store<S: Into<String>>(message: S) -> Self {
        Self::CacheStore {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken | Self::InvalidToken { .. } | Self::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadBackendResponse { .. } => StatusCode::BAD_GATEWAY,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::CacheStore { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the stable error code used in the envelope's `code` member
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_TOKEN",
            Self::InvalidToken { .. } => "INVALID_TOKEN",
            Self::ExpiredToken => "EXPIRED_TOKEN",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::BadBackendResponse { .. } => "BAD_BACKEND_RESPONSE",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::UpstreamTimeout { .. } => "GATEWAY_TIMEOUT",
            Self::CacheStore { .. } => "CACHE_STORE_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Short human-readable title for the envelope's `title` member
    pub fn title(&self) -> &'static str {
        match self {
            Self::MissingToken | Self::InvalidToken { .. } | Self::ExpiredToken => {
                "Authentication required"
            }
            Self::Forbidden { .. } => "Insufficient permissions",
            Self::RouteNotFound { .. } => "Route not found",
            Self::PayloadTooLarge { .. } => "Request too large",
            Self::RateLimitExceeded { .. } => "Rate limit exceeded",
            Self::BadBackendResponse { .. } => "Invalid backend response",
            Self::BackendUnavailable { .. } => "Backend unavailable",
            Self::UpstreamTimeout { .. } => "Gateway timeout",
            Self::CacheStore { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "Internal server error"
            }
        }
    }

    /// Build the JSON:API error envelope body for this error
    ///
    /// Internal failure details are never leaked to clients: 5xx-class errors
    /// carry a generic detail message while the full error is logged server-side.
    pub fn to_envelope(&self, pointer: Option<&str>) -> serde_json::Value {
        let status = self.status_code();
        let detail = if status.is_server_error() {
            match self {
                // Gateway-boundary statuses keep their detail; they describe
                // the upstream interaction, not gateway internals.
                Self::BadBackendResponse { .. }
                | Self::BackendUnavailable { .. }
                | Self::UpstreamTimeout { .. } => self.to_string(),
                _ => "An unexpected error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let mut error = json!({
            "status": status.as_u16().to_string(),
            "code": self.error_code(),
            "title": self.title(),
            "detail": detail,
        });
        if let Some(pointer) = pointer {
            error["source"] = json!({ "pointer": pointer });
        }
        json!({ "errors": [error] })
    }
}

/// A single JSON:API error object, used when deserializing backend error bodies
#[derive(Debug, Clone, Serialize)]
pub struct JsonApiError {
    pub status: String,
    pub code: String,
    pub title: String,
    pub detail: String,
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error for configuration loading
impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from redis::RedisError
impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::CacheStore {
            message: err.to_string(),
        }
    }
}

/// Implement `IntoResponse` so Axum converts pipeline errors into the
/// uniform JSON:API error envelope with the right status code.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_envelope(None);
        let mut response = (status, Json(body)).into_response();

        if let Self::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}
