//! pqmem API - request authentication and rate limiting
//!
//! Every protected request is resolved to an account by session or API key,
//! then charged against that account's rate limit. Collaborators (account
//! store, key cache, sliding-window store, session verifier) are injected as
//! trait objects by the binary's composition root.

pub mod authenticator;
pub mod config;
pub mod constants;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod middleware;
pub mod rate_limiter;
pub mod routes;
pub mod session;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use authenticator::{extract_api_key, AuthDecision, AuthFailure, Authenticator, SessionMiss};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorBody, ErrorCode};
pub use keys::{ApiKeyManager, IssuedApiKey};
pub use metrics::{metrics_handler, PqMetrics, METRICS};
pub use middleware::{insert_rate_limit_headers, require_auth, Authenticated};
pub use rate_limiter::{LocalRateLimiter, RateLimiter};
pub use routes::create_api_router;
pub use session::{
    JwtSessionVerifier, SessionClaims, SessionIdentity, SessionSecret, SessionTokenError,
    SessionVerifier, StaticSessionVerifier,
};
pub use state::AppState;
