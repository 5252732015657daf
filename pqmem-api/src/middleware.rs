//! Axum Middleware for Authentication
//!
//! [`require_auth`] runs the [`Authenticator`](crate::authenticator::Authenticator)
//! for every protected request:
//! - 401 / 429 / 500 are returned as `{"error": ...}` bodies
//! - on success the [`AuthResult`] is injected into request extensions
//! - the response carries `X-RateLimit-*` headers from the admitting decision

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use pqmem_core::{AuthResult, RateLimitDecision};

use crate::constants::{
    HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_RESET,
};
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Authenticate the request or reject it.
///
/// ```ignore
/// let protected = Router::new()
///     .route("/v1/account", get(get_account))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = state.authenticator.authenticate(request.headers()).await?;
    let decision = auth.rate_limit;

    request.extensions_mut().insert(auth);

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    Ok(response)
}

/// Write `X-RateLimit-Limit`, `-Remaining` and, when known, `-Reset`.
pub fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_LIMIT),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_REMAINING),
        HeaderValue::from(decision.remaining),
    );
    if let Some(reset) = decision.reset_epoch_secs() {
        headers.insert(
            HeaderName::from_static(HEADER_RATE_LIMIT_RESET),
            HeaderValue::from(reset),
        );
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// The authenticated caller, injected by [`require_auth`].
///
/// Handlers on routes without the middleware get a 500.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AuthResult);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthResult>()
            .cloned()
            .map(Authenticated)
            .ok_or_else(|| {
                tracing::error!("AuthResult missing from request extensions");
                ApiError::internal_error("Authentication failed")
            })
    }
}

impl std::ops::Deref for Authenticated {
    type Target = AuthResult;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
