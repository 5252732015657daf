//! Constants for the pqmem API
//!
//! Compiled-in limits and timings for authentication and rate limiting.

// ============================================================================
// API KEY LOOKUP
// ============================================================================

/// How long a resolved API key stays memoized in the cache (5 minutes)
pub const API_KEY_CACHE_TTL_SECS: u64 = 300;

/// Maximum accounts fetched per prefix scan before hash verification
pub const API_KEY_CANDIDATE_LIMIT: usize = 10;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Requests allowed per identifier per window
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// Rate-limit window length in seconds
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Probability that a local check also sweeps expired counters
pub const LOCAL_SWEEP_PROBABILITY: f64 = 0.01;

// ============================================================================
// SESSIONS
// ============================================================================

/// Cookie carrying the session token
pub const SESSION_COOKIE_NAME: &str = "__session";

/// Default clock skew tolerance for session token times
pub const DEFAULT_SESSION_CLOCK_SKEW_SECS: i64 = 60;

/// Minimum session secret length accepted in production
pub const MIN_SESSION_SECRET_LENGTH: usize = 32;

/// Placeholder secret used when none is configured
pub const INSECURE_DEFAULT_SESSION_SECRET: &str =
    "INSECURE_DEFAULT_SESSION_SECRET_CHANGE_IN_PRODUCTION";

// ============================================================================
// RESPONSE HEADERS
// ============================================================================

pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
