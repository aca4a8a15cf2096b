//! # Gateway Server
//!
//! Axum server wiring: shared state, the operational endpoints, the pipeline
//! fallback, and graceful shutdown.
//!
//! Key components:
//! - `AppState` shared across all handlers via `Arc`
//! - `tokio::net::TcpListener` for accepting incoming connections
//! - `tower_http::trace::TraceLayer` for per-request tracing spans

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::authz::AuthzConfigCache;
use crate::core::config::ServerSettings;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::pipeline;
use crate::jsonapi::JsonApiProcessor;
use crate::observability::HealthChecker;
use crate::proxy::Forwarder;
use crate::ratelimit::RateLimiter;
use crate::routing::RouteTable;

/// Shared state handed to every handler
pub struct AppState {
    pub route_table: Arc<RouteTable>,
    pub authz_cache: Arc<AuthzConfigCache>,
    pub authenticator: Arc<Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub processor: Arc<JsonApiProcessor>,
    pub forwarder: Arc<Forwarder>,
    pub health: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub max_request_size: usize,
}

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps each request with a fresh UUID unless the client sent one
#[derive(Clone, Copy, Default)]
struct MakeUuidRequestId;

impl MakeRequestId for MakeUuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Build the gateway router
///
/// The operational endpoints are served by the gateway itself and bypass
/// authentication; every other path falls through to the proxy pipeline.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(pipeline::health))
        .route("/ready", get(pipeline::ready))
        .route("/metrics", get(pipeline::metrics))
        .fallback(pipeline::handle)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
                    MakeUuidRequestId,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(
                    axum::http::HeaderName::from_static(REQUEST_ID_HEADER),
                )),
        )
        .with_state(state)
}

/// The HTTP server hosting the gateway router
pub struct GatewayServer {
    router: Router,
    settings: ServerSettings,
}

impl GatewayServer {
    pub fn new(state: Arc<AppState>, settings: ServerSettings) -> Self {
        Self {
            router: build_router(state),
            settings,
        }
    }

    /// Bind and serve until a shutdown signal arrives
    pub async fn run(self) -> GatewayResult<()> {
        let addr = format!("{}:{}", self.settings.bind_address, self.settings.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::config(format!("failed to bind {}: {}", addr, e)))?;

        info!(%addr, "Gateway listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::internal(format!("server error: {}", e)))
    }
}

/// Resolves on SIGTERM or Ctrl-C
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| tracing::error!(error = %e, "Failed to install Ctrl-C handler"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C; shutting down"),
        _ = terminate => info!("Received SIGTERM; shutting down"),
    }
}
