//! Session identity.
//!
//! The identity provider issues HS256 tokens, delivered either in the
//! `__session` cookie or as an `Authorization: Bearer` value. Verification
//! never fails the request: a missing or invalid token yields an anonymous
//! identity and the authenticator moves on to the API-key path.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pqmem_core::{Clock, ConfigError, SystemClock};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::constants::{
    DEFAULT_SESSION_CLOCK_SKEW_SECS, INSECURE_DEFAULT_SESSION_SECRET, SESSION_COOKIE_NAME,
};

// ============================================================================
// SESSION IDENTITY
// ============================================================================

/// Outcome of session verification. Both fields may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Subject issued by the identity provider
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
}

impl SessionIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            session_id: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject_id.is_none()
    }
}

/// Resolves request headers to a session identity.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, headers: &HeaderMap) -> SessionIdentity;
}

/// Returns the same identity for every request.
///
/// Used by tests and by local setups without an identity provider.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionVerifier {
    identity: SessionIdentity,
}

impl StaticSessionVerifier {
    pub fn new(identity: SessionIdentity) -> Self {
        Self { identity }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionVerifier for StaticSessionVerifier {
    async fn verify(&self, _headers: &HeaderMap) -> SessionIdentity {
        self.identity.clone()
    }
}

// ============================================================================
// SESSION SECRET (TYPE-SAFE)
// ============================================================================

/// HMAC secret shared with the identity provider.
#[derive(Clone)]
pub struct SessionSecret(SecretString);

impl SessionSecret {
    pub fn new(secret: String) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "session_secret".to_string(),
            });
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Use only for cryptographic operations.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SESSION_SECRET
    }

    pub fn insecure_default() -> Self {
        Self(SecretString::new(INSECURE_DEFAULT_SESSION_SECRET.into()))
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionSecret([REDACTED, {} chars])", self.len())
    }
}

// ============================================================================
// CLAIMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (identity-provider user id)
    pub sub: String,
    /// Session id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl SessionClaims {
    pub fn new(subject_id: impl Into<String>, ttl_secs: i64, clock: &dyn Clock) -> Self {
        let now = clock.now_epoch_secs();
        Self {
            sub: subject_id.into(),
            sid: None,
            iat: now,
            exp: now + ttl_secs,
            nbf: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.sid = Some(session_id.into());
        self
    }

    pub fn with_not_before(mut self, nbf: i64) -> Self {
        self.nbf = Some(nbf);
        self
    }
}

/// Reason a token was not accepted. Logged, never returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionTokenError {
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token expired")]
    Expired,
    #[error("server clock before epoch")]
    ClockBeforeEpoch,
}

/// Check `nbf` / `exp` against `now`, allowing `leeway_secs` either way.
fn validate_claim_times(
    now: i64,
    exp: i64,
    nbf: Option<i64>,
    leeway_secs: i64,
) -> Result<(), SessionTokenError> {
    if let Some(nbf) = nbf {
        if now + leeway_secs < nbf {
            return Err(SessionTokenError::NotYetValid);
        }
    }

    if exp < now - leeway_secs {
        return Err(SessionTokenError::Expired);
    }

    Ok(())
}

// ============================================================================
// JWT VERIFIER
// ============================================================================

/// HS256 session verifier.
///
/// Signature checking is delegated to `jsonwebtoken`; time checks run
/// against the injected clock.
pub struct JwtSessionVerifier {
    secret: SessionSecret,
    clock: Arc<dyn Clock>,
    leeway_secs: i64,
}

impl JwtSessionVerifier {
    pub fn new(secret: SessionSecret) -> Self {
        Self {
            secret,
            clock: Arc::new(SystemClock),
            leeway_secs: DEFAULT_SESSION_CLOCK_SKEW_SECS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_leeway_secs(mut self, leeway_secs: i64) -> Self {
        self.leeway_secs = leeway_secs.max(0);
        self
    }

    /// Sign claims with the shared secret (development and tests).
    pub fn issue(&self, claims: &SessionClaims) -> Result<String, SessionTokenError> {
        let key = EncodingKey::from_secret(self.secret.expose().as_bytes());
        encode(&Header::new(Algorithm::HS256), claims, &key)
            .map_err(|e| SessionTokenError::Invalid(e.to_string()))
    }

    /// Verify a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        let key = DecodingKey::from_secret(self.secret.expose().as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

        let claims = decode::<SessionClaims>(token, &key, &validation)
            .map_err(|e| SessionTokenError::Invalid(e.to_string()))?
            .claims;

        let now = self.clock.now_epoch_secs();
        if now < 0 {
            tracing::error!(timestamp = now, "System clock returned pre-epoch time");
            return Err(SessionTokenError::ClockBeforeEpoch);
        }

        validate_claim_times(now, claims.exp, claims.nbf, self.leeway_secs)?;
        Ok(claims)
    }
}

impl std::fmt::Debug for JwtSessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSessionVerifier")
            .field("secret", &self.secret)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

#[async_trait]
impl SessionVerifier for JwtSessionVerifier {
    async fn verify(&self, headers: &HeaderMap) -> SessionIdentity {
        let Some(token) = session_token(headers) else {
            return SessionIdentity::anonymous();
        };

        match self.validate(&token) {
            Ok(claims) => SessionIdentity {
                subject_id: Some(claims.sub),
                session_id: claims.sid,
            },
            Err(e) => {
                debug!(reason = %e, "Session token not accepted");
                SessionIdentity::anonymous()
            }
        }
    }
}

// ============================================================================
// TOKEN EXTRACTION
// ============================================================================

/// Find a session token: the `__session` cookie first, then a Bearer value
/// shaped like a JWT. API keys never match the JWT shape.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    session_cookie(headers).or_else(|| bearer_jwt(headers))
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE_NAME && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn bearer_jwt(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && looks_like_jwt(token) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Three non-empty dot-separated segments.
pub fn looks_like_jwt(token: &str) -> bool {
    let mut parts = token.split('.');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(a), Some(b), Some(c), None) if !a.is_empty() && !b.is_empty() && !c.is_empty()
    )
}

// ============================================================================
// TESTS
// ============================================================================
