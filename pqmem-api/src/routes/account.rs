//! Account REST API Routes
//!
//! Both routes sit behind [`require_auth`](crate::middleware::require_auth).

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use pqmem_core::{AccountId, AuthMethod};
use serde::{Deserialize, Serialize};

use crate::authenticator::extract_api_key;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Authenticated;
use crate::state::AppState;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: AccountId,
    pub email: String,
    /// How this request was authenticated
    pub method: AuthMethod,
    pub has_api_key: bool,
}

/// Returned once per rotation; the key cannot be fetched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotatedKeyResponse {
    pub api_key: String,
    pub prefix: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /v1/account
pub async fn get_account(auth: Authenticated) -> Json<AccountResponse> {
    Json(AccountResponse {
        id: auth.account.id,
        email: auth.account.email.clone(),
        method: auth.method,
        has_api_key: auth.account.has_api_key(),
    })
}

/// POST /v1/account/api-key
///
/// When the caller authenticated with a key, that key's cache entry is
/// dropped as part of the rotation.
pub async fn rotate_api_key(
    State(state): State<AppState>,
    auth: Authenticated,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let previous_key = match auth.method {
        AuthMethod::ApiKey => extract_api_key(&headers).ok(),
        AuthMethod::Session => None,
    };

    let issued = state
        .keys
        .rotate(auth.account.id, previous_key.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    Ok((
        StatusCode::CREATED,
        Json(RotatedKeyResponse {
            api_key: issued.key,
            prefix: issued.prefix,
        }),
    ))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/account", get(get_account))
        .route("/v1/account/api-key", post(rotate_api_key))
}
