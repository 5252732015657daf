//! Rate-limit decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry hint used when a rejection carries no reset time.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Answer of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window ends, if the backend knows
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitDecision {
    pub fn allow(limit: u32, remaining: u32, reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: remaining.min(limit),
            reset_at,
        }
    }

    pub fn reject(limit: u32, reset_at: Option<DateTime<Utc>>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
        }
    }

    /// Whole seconds until the window resets, rounded up and never below 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.reset_at {
            Some(reset_at) => {
                let millis = (reset_at - now).num_milliseconds();
                if millis <= 0 {
                    1
                } else {
                    ((millis as u64).div_ceil(1000)).max(1)
                }
            }
            None => DEFAULT_RETRY_AFTER_SECS,
        }
    }

    /// Reset time as Unix epoch seconds, for the `X-RateLimit-Reset` header.
    pub fn reset_epoch_secs(&self) -> Option<i64> {
        self.reset_at.map(|t| t.timestamp())
    }
}
