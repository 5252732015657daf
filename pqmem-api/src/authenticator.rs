//! Request authentication.
//!
//! Resolution order for every request:
//!
//! 1. Session identity (cookie or Bearer JWT) → account by session subject
//! 2. API key from `Authorization` → cache → plaintext column → prefix scan
//!    with Argon2id verification
//! 3. Rate limit keyed by the resolved account id
//!
//! A session miss is not an error; it only hands over to the API-key path.

use axum::http::{header, HeaderMap};
use pqmem_core::{
    api_key_prefix, mask_api_key, Account, AccountId, ApiKeyHasher, AuthError, AuthMethod,
    AuthResult, Clock, InvalidCredentials, PqResult, SystemClock,
};
use pqmem_storage::{AccountStore, ApiKeyCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{API_KEY_CACHE_TTL_SECS, API_KEY_CANDIDATE_LIMIT};
use crate::metrics::with_metrics;
use crate::rate_limiter::RateLimiter;
use crate::session::SessionVerifier;

// ============================================================================
// DECISION
// ============================================================================

/// Why the session branch did not identify the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMiss {
    /// No verified session on the request
    NoSession,
    /// Verified session whose subject has no account
    UnknownSubject,
}

impl SessionMiss {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMiss::NoSession => "no_session",
            SessionMiss::UnknownSubject => "unknown_subject",
        }
    }
}

/// Both branches failed to identify the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub session: SessionMiss,
    pub api_key: AuthError,
}

impl AuthFailure {
    /// Error returned to the client.
    ///
    /// Generic whenever a presented credential failed: a key that resolved to
    /// nothing, or a verified session whose subject has no account. Header
    /// problems keep their specific message only when no session was presented.
    pub fn public_error(&self) -> AuthError {
        match (self.session, &self.api_key) {
            (SessionMiss::UnknownSubject, _)
            | (_, AuthError::InvalidCredentials(InvalidCredentials::UnknownApiKey)) => {
                AuthError::InvalidCredentials(InvalidCredentials::NoValidCredentials)
            }
            (SessionMiss::NoSession, other) => other.clone(),
        }
    }
}

/// Identity resolution outcome, before rate limiting.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    Session(Account),
    ApiKey(Account),
    Failure(AuthFailure),
}

// ============================================================================
// AUTHENTICATOR
// ============================================================================

pub struct Authenticator {
    accounts: Arc<dyn AccountStore>,
    cache: Option<Arc<dyn ApiKeyCache>>,
    sessions: Arc<dyn SessionVerifier>,
    rate_limiter: Arc<RateLimiter>,
    hasher: ApiKeyHasher,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    candidate_limit: usize,
}

impl Authenticator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionVerifier>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            accounts,
            cache: None,
            sessions,
            rate_limiter,
            hasher: ApiKeyHasher::new(),
            clock: Arc::new(SystemClock),
            cache_ttl: Duration::from_secs(API_KEY_CACHE_TTL_SECS),
            candidate_limit: API_KEY_CANDIDATE_LIMIT,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ApiKeyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_hasher(mut self, hasher: ApiKeyHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn hasher(&self) -> &ApiKeyHasher {
        &self.hasher
    }

    /// Authenticate a request and charge it against the caller's rate limit.
    pub async fn authenticate(&self, headers: &HeaderMap) -> PqResult<AuthResult> {
        let result = self.authenticate_inner(headers).await;

        match &result {
            Ok(auth) => {
                debug!(account_id = %auth.account.id, method = %auth.method, "Request authenticated");
                with_metrics(|m| m.record_auth_attempt(auth.method.as_str(), "success"));
            }
            Err(e) => with_metrics(|m| m.record_auth_attempt("none", e.kind())),
        }

        result
    }

    async fn authenticate_inner(&self, headers: &HeaderMap) -> PqResult<AuthResult> {
        let (account, method) = match self.decide(headers).await? {
            AuthDecision::Session(account) => (account, AuthMethod::Session),
            AuthDecision::ApiKey(account) => (account, AuthMethod::ApiKey),
            AuthDecision::Failure(failure) => {
                debug!(
                    session = failure.session.as_str(),
                    api_key = failure.api_key.kind(),
                    "No valid credentials"
                );
                return Err(failure.public_error());
            }
        };

        let rate_limit = self.rate_limiter.check_limit(&account.id.to_string()).await;
        if !rate_limit.allowed {
            let retry_after_secs = rate_limit.retry_after_secs(self.clock.now());
            debug!(account_id = %account.id, retry_after_secs, "Rate limit exceeded");
            return Err(AuthError::RateLimited { retry_after_secs });
        }

        Ok(AuthResult {
            account,
            method,
            rate_limit,
        })
    }

    /// Resolve the caller without touching the rate limiter.
    ///
    /// Store and cache failures are returned as errors; a caller that simply
    /// could not be identified is an [`AuthDecision::Failure`].
    pub async fn decide(&self, headers: &HeaderMap) -> PqResult<AuthDecision> {
        let identity = self.sessions.verify(headers).await;

        let session_miss = match identity.subject_id.as_deref() {
            Some(subject_id) => {
                match self.accounts.find_by_session_subject_id(subject_id).await? {
                    Some(account) => return Ok(AuthDecision::Session(account)),
                    None => {
                        debug!(subject_id, "Session subject has no account");
                        SessionMiss::UnknownSubject
                    }
                }
            }
            None => SessionMiss::NoSession,
        };

        match self.authenticate_api_key(headers).await {
            Ok(account) => Ok(AuthDecision::ApiKey(account)),
            Err(e) if e.is_unauthenticated() => Ok(AuthDecision::Failure(AuthFailure {
                session: session_miss,
                api_key: e,
            })),
            Err(e) => Err(e),
        }
    }

    async fn authenticate_api_key(&self, headers: &HeaderMap) -> PqResult<Account> {
        let key = extract_api_key(headers)?;
        self.resolve_api_key(&key)
            .await?
            .ok_or(AuthError::InvalidCredentials(InvalidCredentials::UnknownApiKey))
    }

    /// Map a plaintext key to its account.
    pub async fn resolve_api_key(&self, key: &str) -> PqResult<Option<Account>> {
        if let Some(cache) = &self.cache {
            if let Some(account_id) = cache.get(key).await? {
                match self.accounts.find_by_id(account_id).await? {
                    Some(account) => {
                        with_metrics(|m| m.record_cache_lookup("hit"));
                        return Ok(Some(account));
                    }
                    None => {
                        debug!(%account_id, "Cached API key points at a missing account");
                        cache.delete(key).await?;
                        with_metrics(|m| m.record_cache_lookup("stale"));
                    }
                }
            } else {
                with_metrics(|m| m.record_cache_lookup("miss"));
            }
        }

        let resolved = match self.accounts.find_by_api_key(key).await? {
            Some(account) => Some(account),
            None => self.find_by_key_hash(key).await?,
        };

        if let (Some(account), Some(cache)) = (&resolved, &self.cache) {
            cache.set_with_ttl(key, account.id, self.cache_ttl).await?;
        }

        Ok(resolved)
    }

    /// Prefix scan followed by hash verification of each candidate.
    async fn find_by_key_hash(&self, key: &str) -> PqResult<Option<Account>> {
        let prefix = api_key_prefix(key);
        let candidates = self
            .accounts
            .find_many_by_api_key_prefix(&prefix, self.candidate_limit)
            .await?;

        for candidate in candidates {
            let Some(stored_hash) = candidate.api_key_hash.clone() else {
                continue;
            };

            let hasher = self.hasher.clone();
            let presented = key.to_string();
            let verified = tokio::task::spawn_blocking(move || hasher.verify(&presented, &stored_hash))
                .await
                .map_err(|e| AuthError::internal(format!("key verification task failed: {}", e)))?;

            match verified {
                Ok(true) => return Ok(Some(candidate)),
                Ok(false) => {}
                Err(e) => {
                    warn!(account_id = %candidate.id, error = ?e, "Skipping unverifiable stored key hash");
                }
            }
        }

        debug!(key = %mask_api_key(key), "No account matched API key");
        Ok(None)
    }

    /// Drop the cache entry for a key.
    pub async fn invalidate_cached_key(&self, key: &str) -> PqResult<()> {
        if let Some(cache) = &self.cache {
            cache.delete(key).await?;
        }
        Ok(())
    }

    /// Cache entries are keyed by raw key, so an account's entries cannot be
    /// found without the plaintext. Staleness is bounded by the cache TTL.
    pub async fn invalidate_for_account(&self, account_id: AccountId) {
        debug!(%account_id, ttl_secs = self.cache_ttl.as_secs(), "Account cache entries expire by TTL");
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("cache", &self.cache.is_some())
            .field("rate_limiter", &self.rate_limiter)
            .field("cache_ttl", &self.cache_ttl)
            .field("candidate_limit", &self.candidate_limit)
            .finish()
    }
}

// ============================================================================
// HEADER PARSING
// ============================================================================

/// Pull an API key from `Authorization: Bearer <key>` or a bare value.
pub fn extract_api_key(headers: &HeaderMap) -> PqResult<String> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?;

    let value = raw
        .to_str()
        .map_err(|_| AuthError::InvalidCredentials(InvalidCredentials::MalformedHeader))?
        .trim();

    let key = if value.eq_ignore_ascii_case("bearer") {
        ""
    } else {
        match value.split_once(|c: char| c.is_ascii_whitespace()) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ => value,
        }
    };

    if key.is_empty() {
        return Err(AuthError::InvalidCredentials(
            InvalidCredentials::MalformedHeader,
        ));
    }

    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth_header(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(header::AUTHORIZATION, value);
        }
        headers
    }

    #[test]
    fn test_extract_bearer_and_bare() -> PqResult<()> {
        assert_eq!(extract_api_key(&auth_header("Bearer pq_abc"))?, "pq_abc");
        assert_eq!(extract_api_key(&auth_header("bearer   pq_abc  "))?, "pq_abc");
        assert_eq!(extract_api_key(&auth_header("pq_abc"))?, "pq_abc");
        Ok(())
    }

    #[test]
    fn test_extract_bearer_separated_by_tab() -> PqResult<()> {
        assert_eq!(extract_api_key(&auth_header("Bearer\tpq_abc"))?, "pq_abc");
        assert_eq!(extract_api_key(&auth_header("BEARER \t pq_abc"))?, "pq_abc");
        assert_eq!(
            extract_api_key(&auth_header("Bearer\t")),
            Err(AuthError::InvalidCredentials(
                InvalidCredentials::MalformedHeader
            ))
        );
        Ok(())
    }

    #[test]
    fn test_extract_missing_and_empty() {
        assert_eq!(
            extract_api_key(&HeaderMap::new()),
            Err(AuthError::MissingCredentials)
        );
        for value in ["", "Bearer", "Bearer    "] {
            assert_eq!(
                extract_api_key(&auth_header(value)),
                Err(AuthError::InvalidCredentials(
                    InvalidCredentials::MalformedHeader
                )),
                "header value {:?}",
                value
            );
        }
    }

    #[test]
    fn test_public_error_hides_unknown_key() {
        let failure = AuthFailure {
            session: SessionMiss::UnknownSubject,
            api_key: AuthError::InvalidCredentials(InvalidCredentials::UnknownApiKey),
        };
        assert_eq!(
            failure.public_error().to_string(),
            "Unauthorized — please provide valid session or API key"
        );

        let missing = AuthFailure {
            session: SessionMiss::NoSession,
            api_key: AuthError::MissingCredentials,
        };
        assert_eq!(missing.public_error(), AuthError::MissingCredentials);
    }

    #[test]
    fn test_public_error_is_generic_after_unknown_session_subject() {
        for api_key in [
            AuthError::MissingCredentials,
            AuthError::InvalidCredentials(InvalidCredentials::MalformedHeader),
        ] {
            let failure = AuthFailure {
                session: SessionMiss::UnknownSubject,
                api_key,
            };
            assert_eq!(
                failure.public_error(),
                AuthError::InvalidCredentials(InvalidCredentials::NoValidCredentials)
            );
        }
    }
}
