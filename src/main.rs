//! # JSON:API Gateway - Main Entry Point
//!
//! Startup sequence:
//! 1. Initialize observability (structured logging + Prometheus recorder)
//! 2. Load and validate configuration
//! 3. Connect the cache store, falling back to in-memory when Redis is down
//! 4. Bootstrap routes and policies from the control plane
//! 5. Spawn the configuration event consumer
//! 6. Serve until SIGTERM or Ctrl-C
//!
//! Every dependency failure past configuration validation degrades instead of
//! aborting: the gateway starts with whatever configuration it could load and
//! converges as dependencies come back.

use dashmap::DashMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{error, info, warn};

use jsonapi_gateway::auth::Authenticator;
use jsonapi_gateway::authz::AuthzConfigCache;
use jsonapi_gateway::bootstrap::BootstrapLoader;
use jsonapi_gateway::cache::{CacheStore, InMemoryCacheStore, RedisCacheStore};
use jsonapi_gateway::events::ConfigEventConsumer;
use jsonapi_gateway::gateway::AppState;
use jsonapi_gateway::jsonapi::JsonApiProcessor;
use jsonapi_gateway::observability::{ConsumerLiveness, HealthChecker};
use jsonapi_gateway::proxy::Forwarder;
use jsonapi_gateway::ratelimit::RateLimiter;
use jsonapi_gateway::routing::RouteTable;
use jsonapi_gateway::{GatewayConfig, GatewayError, GatewayResult, GatewayServer};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let metrics_handle = init_observability()?;

    info!("🚀 Starting JSON:API Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match graceful_startup(metrics_handle).await {
        Ok(server) => {
            server.run().await?;
        }
        Err(e) => {
            error!("Failed to start gateway: {}", e);
            std::process::exit(1);
        }
    }

    info!("✅ Gateway shutdown complete");
    Ok(())
}

/// Initialize structured logging and the Prometheus recorder
fn init_observability() -> GatewayResult<PrometheusHandle> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .json(),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jsonapi_gateway=info,tower_http=warn".into()),
        )
        .init();

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GatewayError::config(format!("failed to install metrics recorder: {}", e)))?;

    info!("📊 Observability initialized");
    Ok(handle)
}

/// Build every component and seed the configuration caches
async fn graceful_startup(metrics_handle: PrometheusHandle) -> GatewayResult<GatewayServer> {
    info!("📋 Loading configuration...");
    let config_path =
        std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "config/gateway.yaml".to_string());
    let mut config = if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
        GatewayConfig::load_from_file(&config_path).await?
    } else {
        warn!(path = %config_path, "No configuration file found; using defaults");
        GatewayConfig::default()
    };
    config.apply_env_overrides()?;
    config.validate()?;
    info!("✅ Configuration loaded and validated");

    let store = connect_cache_store(&config).await;

    let route_table = Arc::new(RouteTable::new());
    let authz_cache = Arc::new(AuthzConfigCache::new());
    let service_urls = Arc::new(DashMap::new());
    let liveness = Arc::new(ConsumerLiveness::new());

    info!("🔗 Bootstrapping configuration from control plane...");
    let loader = BootstrapLoader::new(config.control_plane.clone());
    let loaded = loader.load(&route_table, &authz_cache, &service_urls).await;
    info!(routes = loaded, "Bootstrap finished");

    info!("📡 Starting configuration event consumer...");
    let consumer = Arc::new(ConfigEventConsumer::new(
        Arc::clone(&route_table),
        Arc::clone(&authz_cache),
        Arc::clone(&service_urls),
        Arc::clone(&liveness),
        config.nats.clone(),
    ));
    tokio::spawn(consumer.run());

    let health = Arc::new(HealthChecker::new(
        Arc::clone(&store),
        liveness,
        config.control_plane.clone(),
    ));
    health.mark_ready();

    let state = Arc::new(AppState {
        route_table,
        authz_cache,
        authenticator: Arc::new(Authenticator::new(&config.auth)?),
        rate_limiter: Arc::new(RateLimiter::new(Arc::clone(&store))),
        processor: Arc::new(JsonApiProcessor::new(store)),
        forwarder: Arc::new(Forwarder::new(&config.upstream)?),
        health,
        metrics_handle: Some(metrics_handle),
        max_request_size: config.upstream.max_request_size,
    });

    info!("🌐 Gateway ready on {}:{}", config.server.bind_address, config.server.port);
    Ok(GatewayServer::new(state, config.server.clone()))
}

/// Connect Redis, degrading to the in-memory store when it is unreachable
///
/// Rate limiting and include resolution keep working per instance; the
/// health report shows the degradation until a restart reconnects.
async fn connect_cache_store(config: &GatewayConfig) -> Arc<dyn CacheStore> {
    match RedisCacheStore::connect(&config.redis.url).await {
        Ok(store) => {
            info!(url = %config.redis.url, "Connected to Redis");
            Arc::new(store)
        }
        Err(e) => {
            warn!(url = %config.redis.url, error = %e, "Redis unreachable; using in-memory cache store");
            Arc::new(InMemoryCacheStore::new())
        }
    }
}
