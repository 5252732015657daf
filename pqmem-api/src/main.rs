//! pqmem API Server Entry Point
//!
//! Composition root: builds the account store, key cache, rate limiter and
//! session verifier from the environment, then serves the Axum router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pqmem_api::{
    create_api_router, telemetry::init_tracing, ApiConfig, ApiError, ApiResult, AppState,
    Authenticator, JwtSessionVerifier, LocalRateLimiter, RateLimiter,
};
use pqmem_api::constants::{RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_SECS};
use pqmem_storage::{
    connect_redis, ApiKeyCache, DbConfig, InMemoryApiKeyCache, PgAccountStore, RedisApiKeyCache,
    RedisSlidingWindow,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing()?;

    let config = ApiConfig::from_env();
    config.validate_for_production()?;

    let db_config = DbConfig::from_env();
    let accounts = Arc::new(PgAccountStore::from_config(&db_config)?);
    tracing::info!(
        host = %db_config.host,
        dbname = %db_config.dbname,
        max_size = db_config.max_size,
        "Account store pool configured"
    );

    let (cache, rate_limiter) = build_cache_and_limiter(&config).await;

    let sessions = Arc::new(
        JwtSessionVerifier::new(config.session_secret.clone())
            .with_leeway_secs(config.session_clock_skew_secs),
    );

    let authenticator = Arc::new(
        Authenticator::new(accounts, sessions, Arc::new(rate_limiter)).with_cache(cache),
    );
    let app = create_api_router(AppState::new(authenticator, config));

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting pqmem API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Redis-backed cache and sliding window when reachable, in-process otherwise.
async fn build_cache_and_limiter(config: &ApiConfig) -> (Arc<dyn ApiKeyCache>, RateLimiter) {
    let local = LocalRateLimiter::default();

    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("No Redis URL configured, using in-process cache and rate limiter");
        let cache: Arc<dyn ApiKeyCache> = Arc::new(InMemoryApiKeyCache::new());
        return (cache, RateLimiter::local(local));
    };

    match connect_redis(url).await {
        Ok(conn) => {
            tracing::info!(analytics = config.rate_limit_analytics, "Connected to Redis");
            let window = RedisSlidingWindow::new(
                conn.clone(),
                RATE_LIMIT_MAX_REQUESTS,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            )
            .with_analytics(config.rate_limit_analytics);
            let cache: Arc<dyn ApiKeyCache> = Arc::new(RedisApiKeyCache::new(conn));
            (cache, RateLimiter::distributed(Arc::new(window), local))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, using in-process cache and rate limiter");
            let cache: Arc<dyn ApiKeyCache> = Arc::new(InMemoryApiKeyCache::new());
            (cache, RateLimiter::local(local))
        }
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("PQ_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("PQ_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
