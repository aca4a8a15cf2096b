//! The request pipeline, mounted as the router fallback.
//!
//! Stage order is fixed: authenticate, resolve the route, rate limit,
//! authorize, forward, post-process. The first failing stage short-circuits
//! into the JSON:API error envelope; rate limit headers from an evaluated
//! limit are attached to whichever response ends the request, allowed or
//! denied.
//!
//! Post-processing (field authorization and include resolution) applies only
//! to successful authenticated GET responses that declare a JSON body;
//! everything else passes through byte for byte.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::server::AppState;
use crate::ratelimit::RateLimitDecision;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

const JSON_API_CONTENT_TYPE: &str = "application/vnd.api+json";

/// Fallback handler that runs every proxied request through the pipeline
pub async fn handle(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut decision: Option<RateLimitDecision> = None;
    let mut response = match dispatch(&state, request, &mut decision).await {
        Ok(response) => response,
        Err(error) => {
            debug!(%method, %path, error = %error, "Pipeline rejected request");
            error.into_response()
        }
    };

    if let Some(decision) = decision {
        apply_rate_limit_headers(&mut response, &decision);
    }

    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);

    response
}

async fn dispatch(
    state: &AppState,
    request: Request<Body>,
    decision_out: &mut Option<RateLimitDecision>,
) -> GatewayResult<Response> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    // Exempt paths carry no principal; everything downstream that needs one
    // is skipped for them.
    let principal: Option<Principal> = if state.authenticator.is_exempt(&path) {
        None
    } else {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        Some(state.authenticator.authenticate(header)?)
    };

    let route = state
        .route_table
        .lookup(&path)
        .ok_or_else(|| GatewayError::RouteNotFound { path: path.clone() })?;

    if let Some(limit) = &route.rate_limit {
        let principal_key = principal
            .as_ref()
            .map(|p| p.username.as_str())
            .unwrap_or("anonymous");
        if let Some(decision) = state.rate_limiter.check(&route.id, principal_key, limit).await {
            let denied = !decision.allowed;
            let retry_after_secs = decision
                .retry_after
                .unwrap_or(limit.window)
                .as_secs()
                .max(1);
            *decision_out = Some(decision);
            if denied {
                return Err(GatewayError::RateLimitExceeded {
                    limit: limit.requests_per_window,
                    retry_after_secs,
                });
            }
        }
        // check() returned None: the store is down and the limit fails open
    }

    let authz = state.authz_cache.get(&route.collection_id);
    if let Some(principal) = &principal {
        if !crate::authz::route_allowed(authz.as_deref(), &parts.method, principal) {
            counter!("gateway_authz_denied_total").increment(1);
            return Err(GatewayError::forbidden(format!(
                "principal lacks a required role for {} {}",
                parts.method, path
            )));
        }
    }

    let body = axum::body::to_bytes(body, state.max_request_size)
        .await
        .map_err(|_| GatewayError::PayloadTooLarge {
            max_bytes: state.max_request_size,
        })?;

    let backend = state
        .forwarder
        .forward(
            &route,
            principal.as_ref(),
            &parts.method,
            &path_and_query,
            &parts.headers,
            body,
        )
        .await?;

    if parts.method == Method::GET && backend.status.is_success() && backend.is_json() {
        if let Some(principal) = &principal {
            let include = include_param(parts.uri.query());
            match state
                .processor
                .process(
                    &backend.body,
                    include.as_deref(),
                    authz.as_deref(),
                    principal,
                )
                .await
            {
                Ok(document) => {
                    let body = serde_json::to_vec(&document).map_err(|e| {
                        GatewayError::internal(format!("failed to serialize document: {}", e))
                    })?;
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = backend.status;
                    *response.headers_mut() = backend.headers;
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_API_CONTENT_TYPE));
                    return Ok(response);
                }
                Err(e) => {
                    warn!(route_id = %route.id, error = %e, "Backend body is not a JSON:API document");
                    return Err(e);
                }
            }
        }
    }

    let mut response = Response::new(Body::from(backend.body));
    *response.status_mut() = backend.status;
    *response.headers_mut() = backend.headers;
    Ok(response)
}

/// The `include` query parameter, if present
fn include_param(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "include")
        .map(|(_, value)| value.into_owned())
}

fn apply_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(RATE_LIMIT_LIMIT_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(RATE_LIMIT_REMAINING_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert(RATE_LIMIT_RESET_HEADER, value);
    }
}

/// Readiness probe: 200 once startup completed, 503 before
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    if state.health.is_ready() {
        (StatusCode::OK, axum::Json(serde_json::json!({"ready": true}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({"ready": false})),
        )
            .into_response()
    }
}

/// Liveness and dependency report; degraded dependencies do not fail the probe
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let report = state.health.check().await;
    (StatusCode::OK, axum::Json(report)).into_response()
}

/// Prometheus exposition endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_param_extraction() {
        assert_eq!(
            include_param(Some("include=tasks.assignee&page=2")),
            Some("tasks.assignee".to_string())
        );
        assert_eq!(include_param(Some("page=2")), None);
        assert_eq!(include_param(None), None);
    }
}
