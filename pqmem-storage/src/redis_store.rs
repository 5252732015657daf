//! Redis / Dragonfly backends.
//!
//! - [`RedisApiKeyCache`]: API key → account id with a TTL
//! - [`RedisSlidingWindow`]: two-window weighted counter, checked and
//!   incremented atomically by a Lua script

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pqmem_core::{AccountId, Clock, RateLimitDecision, StoreError, SystemClock};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::{ApiKeyCache, SlidingWindowStore};

/// Key namespace for cached API key lookups.
pub const API_KEY_CACHE_NAMESPACE: &str = "apikey";

/// Key namespace for sliding-window counters.
pub const RATE_LIMIT_NAMESPACE: &str = "ratelimit";

/// Key namespace for per-day allow/block analytics.
pub const RATE_LIMIT_ANALYTICS_NAMESPACE: &str = "ratelimit:analytics";

const ANALYTICS_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Open a managed connection and verify it with `PING`.
pub async fn connect(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(url).map_err(|e| StoreError::Cache {
        reason: format!("Failed to create Redis client: {}", e),
    })?;

    let manager = ConnectionManager::new(client)
        .await
        .map_err(|e| StoreError::Cache {
            reason: format!("Failed to create connection manager: {}", e),
        })?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| StoreError::Cache {
            reason: format!("Failed to ping Redis: {}", e),
        })?;

    debug!("Connected to Redis");
    Ok(manager)
}

// ============================================================================
// API KEY CACHE
// ============================================================================

/// API key cache stored in Redis.
#[derive(Clone)]
pub struct RedisApiKeyCache {
    conn: ConnectionManager,
}

impl RedisApiKeyCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub fn cache_key(api_key: &str) -> String {
        format!("{}:{}", API_KEY_CACHE_NAMESPACE, api_key)
    }
}

#[async_trait]
impl ApiKeyCache for RedisApiKeyCache {
    async fn get(&self, key: &str) -> Result<Option<AccountId>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(Self::cache_key(key))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;

        match value {
            Some(raw) => match raw.parse::<AccountId>() {
                Ok(id) => Ok(Some(id)),
                Err(e) => {
                    warn!(error = %e, "Unparseable account id in API key cache, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        account_id: AccountId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::cache_key(key))
            .arg(account_id.to_string())
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(Self::cache_key(key))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(())
    }
}

fn cache_error(e: redis::RedisError) -> StoreError {
    StoreError::Cache {
        reason: e.to_string(),
    }
}

// ============================================================================
// SLIDING WINDOW
// ============================================================================

/// KEYS[1] current window, KEYS[2] previous window.
/// ARGV[1] limit, ARGV[2] window length (ms), ARGV[3] elapsed in current window (ms).
///
/// Returns the remaining allowance after this request, or -1 when rejected.
/// A rejected request is not counted.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local elapsed_ms = tonumber(ARGV[3])

local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local previous = tonumber(redis.call('GET', KEYS[2]) or '0')
local weight = (window_ms - elapsed_ms) / window_ms

if previous * weight + current >= limit then
  return -1
end

current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], window_ms * 2)
end

local remaining = limit - (previous * weight + current)
if remaining < 0 then
  remaining = 0
end
return math.floor(remaining)
"#;

/// Position of an instant within fixed windows of `window_ms`.
///
/// Returns `(window_index, elapsed_ms_in_window)`.
pub fn window_position(now_ms: i64, window_ms: i64) -> (i64, i64) {
    (now_ms.div_euclid(window_ms), now_ms.rem_euclid(window_ms))
}

/// Distributed sliding-window counter.
pub struct RedisSlidingWindow {
    conn: ConnectionManager,
    script: redis::Script,
    limit: u32,
    window: Duration,
    analytics: bool,
    clock: Arc<dyn Clock>,
}

impl RedisSlidingWindow {
    pub fn new(conn: ConnectionManager, limit: u32, window: Duration) -> Self {
        Self {
            conn,
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
            limit,
            window,
            analytics: false,
            clock: Arc::new(SystemClock),
        }
    }

    /// Record per-day allowed/blocked counters per identifier.
    pub fn with_analytics(mut self, enabled: bool) -> Self {
        self.analytics = enabled;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn window_key(identifier: &str, window_index: i64) -> String {
        format!("{}:{}:{}", RATE_LIMIT_NAMESPACE, identifier, window_index)
    }

    pub fn analytics_key(identifier: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}",
            RATE_LIMIT_ANALYTICS_NAMESPACE,
            identifier,
            now.format("%Y-%m-%d")
        )
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis())
            .unwrap_or(i64::MAX)
            .max(1)
    }

    /// Best effort; failures never affect the decision.
    async fn record_analytics(&self, identifier: &str, now: DateTime<Utc>, allowed: bool) {
        let field = if allowed { "allowed" } else { "blocked" };
        let key = Self::analytics_key(identifier, now);
        let mut conn = self.conn.clone();

        let result: Result<(), redis::RedisError> = redis::pipe()
            .cmd("HINCRBY")
            .arg(&key)
            .arg(field)
            .arg(1)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ANALYTICS_RETENTION_SECS)
            .ignore()
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            debug!(error = %e, "Failed to record rate-limit analytics");
        }
    }
}

#[async_trait]
impl SlidingWindowStore for RedisSlidingWindow {
    async fn limit(&self, identifier: &str) -> Result<RateLimitDecision, StoreError> {
        let now = self.clock.now();
        let window_ms = self.window_ms();
        let (window_index, elapsed_ms) = window_position(now.timestamp_millis(), window_ms);

        let mut conn = self.conn.clone();
        let remaining: i64 = self
            .script
            .key(Self::window_key(identifier, window_index))
            .key(Self::window_key(identifier, window_index - 1))
            .arg(self.limit)
            .arg(window_ms)
            .arg(elapsed_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::RateLimitStore {
                reason: e.to_string(),
            })?;

        let reset_at = DateTime::from_timestamp_millis((window_index + 1) * window_ms);
        let decision = if remaining < 0 {
            RateLimitDecision::reject(self.limit, reset_at)
        } else {
            let remaining = u32::try_from(remaining).unwrap_or(self.limit);
            RateLimitDecision::allow(self.limit, remaining, reset_at)
        };

        if self.analytics {
            self.record_analytics(identifier, now, decision.allowed).await;
        }

        Ok(decision)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
