//! Per-account rate limiting.
//!
//! [`RateLimiter`] prefers the shared sliding-window store. When that store
//! errors, the same call is answered by the in-process [`LocalRateLimiter`],
//! so a Redis outage never turns into rejected or failed requests.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use pqmem_core::{Clock, RateLimitDecision, SystemClock};
use pqmem_storage::SlidingWindowStore;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{LOCAL_SWEEP_PROBABILITY, RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_SECS};
use crate::metrics::with_metrics;

// ============================================================================
// LOCAL FIXED WINDOW
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// In-process fixed-window counter keyed by identifier.
///
/// Each identifier's counter is read and updated under its DashMap shard
/// lock, so concurrent checks for the same identifier never lose updates.
/// Counters are per process and are not shared between replicas.
pub struct LocalRateLimiter {
    windows: DashMap<String, LocalWindow>,
    limit: u32,
    window: Duration,
    sweep_probability: f64,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
            sweep_probability: LOCAL_SWEEP_PROBABILITY,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Probability in `[0, 1]` that a check first sweeps expired counters.
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of tracked identifiers, expired ones included.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every counter whose window has ended.
    pub fn sweep_expired(&self, now: DateTime<Utc>) {
        self.windows.retain(|_, window| window.reset_at > now);
    }

    /// Check and record one request for `identifier`.
    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        let now = self.clock.now();

        // Sweep before taking the entry lock; retain needs every shard.
        if self.sweep_probability > 0.0 && rand::random::<f64>() < self.sweep_probability {
            self.sweep_expired(now);
        }

        let mut entry = self
            .windows
            .entry(identifier.to_string())
            .or_insert(LocalWindow {
                count: 0,
                reset_at: now,
            });
        let window = entry.value_mut();

        if now >= window.reset_at {
            window.count = 1;
            window.reset_at = now + self.window;
            return RateLimitDecision::allow(
                self.limit,
                self.limit.saturating_sub(1),
                Some(window.reset_at),
            );
        }

        if window.count >= self.limit {
            return RateLimitDecision::reject(self.limit, Some(window.reset_at));
        }

        window.count += 1;
        RateLimitDecision::allow(
            self.limit,
            self.limit.saturating_sub(window.count),
            Some(window.reset_at),
        )
    }
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new(
            RATE_LIMIT_MAX_REQUESTS,
            Duration::seconds(RATE_LIMIT_WINDOW_SECS as i64),
        )
    }
}

impl std::fmt::Debug for LocalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRateLimiter")
            .field("tracked", &self.windows.len())
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("sweep_probability", &self.sweep_probability)
            .finish()
    }
}

// ============================================================================
// RATE LIMITER
// ============================================================================

/// Distributed-first rate limiter with local failover.
pub struct RateLimiter {
    distributed: Option<Arc<dyn SlidingWindowStore>>,
    local: LocalRateLimiter,
}

impl RateLimiter {
    /// Local counting only.
    pub fn local(local: LocalRateLimiter) -> Self {
        Self {
            distributed: None,
            local,
        }
    }

    /// Shared store first, `local` when it fails.
    pub fn distributed(store: Arc<dyn SlidingWindowStore>, local: LocalRateLimiter) -> Self {
        Self {
            distributed: Some(store),
            local,
        }
    }

    pub fn has_distributed_backend(&self) -> bool {
        self.distributed.is_some()
    }

    pub fn local_limiter(&self) -> &LocalRateLimiter {
        &self.local
    }

    /// Decide whether `identifier` may proceed. Never fails.
    pub async fn check_limit(&self, identifier: &str) -> RateLimitDecision {
        if let Some(store) = &self.distributed {
            match store.limit(identifier).await {
                Ok(decision) => {
                    with_metrics(|m| {
                        m.record_rate_limit_decision(store.backend_name(), decision.allowed)
                    });
                    return decision;
                }
                Err(e) => {
                    warn!(
                        backend = store.backend_name(),
                        error = %e,
                        "Distributed rate limiter failed, using local counter"
                    );
                    with_metrics(|m| m.record_rate_limit_failover(store.backend_name()));
                }
            }
        }

        let decision = self.local.check(identifier);
        debug!(
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Local rate-limit decision"
        );
        with_metrics(|m| m.record_rate_limit_decision("local", decision.allowed));
        decision
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field(
                "distributed",
                &self.distributed.as_ref().map(|s| s.backend_name()),
            )
            .field("local", &self.local)
            .finish()
    }
}
