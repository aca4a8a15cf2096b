//! # Request Forwarding
//!
//! Forwards an incoming request to the backend a route resolves to and hands
//! the full response back to the pipeline.
//!
//! Header policy on the way out:
//! - `Authorization` is dropped: backends trust the gateway's identity
//!   headers, never the raw token
//! - `Host` and hop-by-hop headers are dropped
//! - `X-Forwarded-User` and `X-Forwarded-Roles` carry the authenticated
//!   identity when the request had one
//!
//! Backend bodies are buffered in full before the response is returned, which
//! is what allows the pipeline to post-process JSON:API documents.

use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::core::config::UpstreamSettings;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::RouteDefinition;

/// Identity header carrying the authenticated username
pub const FORWARDED_USER_HEADER: &str = "x-forwarded-user";
/// Identity header carrying the sorted, comma-joined role list
pub const FORWARDED_ROLES_HEADER: &str = "x-forwarded-roles";

/// Request headers never copied to the backend
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
];

/// Backend response headers never copied back to the client
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

/// A fully buffered backend response
#[derive(Debug)]
pub struct BackendResponse {
    pub status: axum::http::StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    /// Whether the backend declared a JSON body
    pub fn is_json(&self) -> bool {
        self.headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("json"))
            .unwrap_or(false)
    }
}

/// HTTP client wrapper that forwards requests to route backends
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    /// Build a forwarder with the configured upstream timeout
    pub fn new(settings: &UpstreamSettings) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout: settings.timeout,
        })
    }

    /// Forward one request to the backend of the given route
    ///
    /// `path_and_query` is the original request path plus query string; it is
    /// appended unchanged to the route's backend base URL.
    pub async fn forward(
        &self,
        route: &RouteDefinition,
        principal: Option<&Principal>,
        method: &axum::http::Method,
        path_and_query: &str,
        headers: &axum::http::HeaderMap,
        body: Bytes,
    ) -> GatewayResult<BackendResponse> {
        let url = format!(
            "{}{}",
            route.backend_base_url.trim_end_matches('/'),
            path_and_query
        );

        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| GatewayError::internal(format!("invalid request method: {}", e)))?;

        debug!(route_id = %route.id, %url, "Forwarding request to backend");

        let response = self
            .client
            .request(method, &url)
            .headers(outbound_headers(headers, principal))
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&route.backend_base_url, e))?;

        let status = axum::http::StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
        let headers = inbound_headers(response.headers());
        let body = response.bytes().await.map_err(|e| {
            warn!(route_id = %route.id, error = %e, "Failed to read backend body");
            GatewayError::BackendUnavailable {
                backend: route.backend_base_url.clone(),
                reason: format!("body read failed: {}", e),
            }
        })?;

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }

    fn map_send_error(&self, backend: &str, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::UpstreamTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            GatewayError::BackendUnavailable {
                backend: backend.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

/// Copy client headers to the outbound request, minus stripped ones, and
/// append the identity headers
fn outbound_headers(
    headers: &axum::http::HeaderMap,
    principal: Option<&Principal>,
) -> reqwest::header::HeaderMap {
    let mut outbound = reqwest::header::HeaderMap::new();

    for (name, value) in headers {
        let lowered = name.as_str().to_ascii_lowercase();
        if STRIPPED_REQUEST_HEADERS.contains(&lowered.as_str()) {
            continue;
        }
        let name = match reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()) {
            Ok(name) => name,
            Err(_) => continue,
        };
        if let Ok(value) = reqwest::header::HeaderValue::from_bytes(value.as_bytes()) {
            outbound.append(name, value);
        }
    }

    if let Some(principal) = principal {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&principal.username) {
            outbound.insert(
                reqwest::header::HeaderName::from_static(FORWARDED_USER_HEADER),
                value,
            );
        }
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&principal.roles_header_value()) {
            outbound.insert(
                reqwest::header::HeaderName::from_static(FORWARDED_ROLES_HEADER),
                value,
            );
        }
    }

    outbound
}

/// Copy backend response headers back, minus the ones axum manages itself
fn inbound_headers(headers: &reqwest::header::HeaderMap) -> axum::http::HeaderMap {
    let mut inbound = axum::http::HeaderMap::new();

    for (name, value) in headers {
        if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let name = match axum::http::HeaderName::from_bytes(name.as_str().as_bytes()) {
            Ok(name) => name,
            Err(_) => continue,
        };
        if let Ok(value) = axum::http::HeaderValue::from_bytes(value.as_bytes()) {
            inbound.append(name, value);
        }
    }

    inbound
}
