use std::sync::Arc;

use anyhow::Result;
use axum::routing::{any, get};
use axum::Router;
use clap::Parser;
use tracing::info;

mod admin;
mod auth;
mod cache;
mod config;
mod connection;
mod control;
mod correlation;
mod gateway;
mod headers;
mod log_export;
mod pages;
mod ratelimit;
mod registry;
mod stats;
mod store;

use cache::{CacheBackend, InMemoryCacheBackend};
use config::{RelayConfig, TunnelPresets};
use ratelimit::RateLimiter;
use registry::TunnelRegistry;
use stats::StatsObserver;
use store::{InMemoryRequestLogStore, InMemoryTokenStore, InMemoryTunnelStore, TokenRecord};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("uniroute_relay=info")),
        )
        .init();

    let config = RelayConfig::parse();

    let registry = Arc::new(TunnelRegistry::new());
    let stats = StatsObserver::new();
    let tunnel_store: Arc<dyn store::TunnelStore> = Arc::new(InMemoryTunnelStore::default());
    let token_store: Arc<dyn store::TokenStore> = Arc::new(InMemoryTokenStore::default());
    let request_log_store: Arc<dyn store::RequestLogStore> = Arc::new(InMemoryRequestLogStore::default());

    if let Some(raw_token) = &config.auth_token {
        token_store
            .insert(TokenRecord {
                id: "default".to_string(),
                token_hash: auth::hash_token(raw_token),
                name: "default".to_string(),
                created_at: chrono::Utc::now(),
                expires_at: None,
                is_active: true,
            })
            .await?;
    }

    let cache_backend: Arc<dyn CacheBackend> = build_cache_backend(&config).await?;
    let rate_limiter = Arc::new(RateLimiter::new(cache_backend, config.rate_limit_config()));
    let log_exporter = log_export::LogExporter::spawn(request_log_store);

    let rate_limit_overrides = Arc::new(load_rate_limit_overrides(&config));

    let control_state = control::ControlState {
        registry: registry.clone(),
        tunnel_store: tunnel_store.clone(),
        token_store,
        stats: stats.clone(),
        domain: config.domain.clone(),
        max_frame_size: config.max_frame_size,
        outbound_queue_capacity: config.outbound_queue_capacity,
    };

    let gateway_state = gateway::GatewayState {
        registry: registry.clone(),
        rate_limiter,
        stats: stats.clone(),
        log_exporter,
        domain: config.domain.clone(),
        max_body_size: config.max_body_size,
        request_deadline: std::time::Duration::from_secs(config.request_deadline_secs),
        rate_limit_overrides,
    };

    let admin_state = admin::AdminState {
        registry: registry.clone(),
        stats,
    };

    let app = Router::new()
        .route("/tunnel", get(control::ws_handler))
        .with_state(control_state)
        .merge(
            Router::new()
                .route("/api/tunnels", get(admin::list_tunnels))
                .route("/api/tunnels/:id", get(admin::get_tunnel))
                .route("/api/tunnels/:id/stats", get(admin::get_tunnel_stats))
                .route("/health", get(admin::health_handler))
                .with_state(admin_state),
        )
        .merge(
            Router::new()
                .fallback(any(gateway::proxy_handler))
                .with_state(gateway_state),
        );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(domain = %config.domain, %addr, "uniroute relay listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Load the tunnel presets file, if one is configured and present, and
/// flatten it into a per-subdomain rate-limit override map for the
/// gateway. A missing or unreadable file just means no overrides.
fn load_rate_limit_overrides(config: &RelayConfig) -> std::collections::HashMap<String, ratelimit::RateLimitConfig> {
    let Some(path) = config.resolved_presets_path() else {
        return std::collections::HashMap::new();
    };
    match TunnelPresets::load(&path) {
        Ok(presets) => presets
            .tunnels
            .into_iter()
            .filter(|p| p.enabled)
            .filter_map(|p| p.rate_limit.map(|rl| (p.subdomain, rl.into())))
            .collect(),
        Err(e) => {
            tracing::warn!(?path, error = %e, "failed to load tunnel presets; continuing without overrides");
            std::collections::HashMap::new()
        }
    }
}

async fn build_cache_backend(config: &RelayConfig) -> Result<Arc<dyn CacheBackend>> {
    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let backend = cache::RedisCacheBackend::connect(url).await?;
        return Ok(Arc::new(backend));
    }
    #[cfg(not(feature = "redis"))]
    if config.redis_url.is_some() {
        tracing::warn!("redis_url configured but the `redis` feature is not enabled; using in-memory cache backend");
    }
    Ok(Arc::new(InMemoryCacheBackend::new()))
}
