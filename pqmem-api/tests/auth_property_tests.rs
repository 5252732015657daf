//! Property-Based Tests for Authentication Enforcement
//!
//! For any request to a protected route:
//! - a known API key gets 200 with rate-limit headers
//! - anything else gets 401 with a JSON `error` body
//! - once an account exceeds its ceiling, every further request in the
//!   window gets 429 with `Retry-After` of at least one second

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use pqmem_api::{
    create_api_router, ApiConfig, AppState, Authenticator, ErrorBody, LocalRateLimiter,
    RateLimiter, StaticSessionVerifier,
};
use pqmem_core::{Account, ManualClock};
use pqmem_storage::{InMemoryAccountStore, InMemoryApiKeyCache};
use pqmem_test_utils::fixtures::{cheap_hasher, plaintext_key_account};
use pqmem_test_utils::generators::arb_api_key;
use proptest::prelude::*;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tower::ServiceExt;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn test_app(accounts: Vec<Account>, limit: u32) -> Router {
    let clock = Arc::new(ManualClock::starting_2024());
    let limiter = LocalRateLimiter::new(limit, Duration::seconds(60))
        .with_clock(clock.clone())
        .with_sweep_probability(0.0);

    let authenticator = Authenticator::new(
        Arc::new(InMemoryAccountStore::with_accounts(accounts)),
        Arc::new(StaticSessionVerifier::anonymous()),
        Arc::new(RateLimiter::local(limiter)),
    )
    .with_cache(Arc::new(InMemoryApiKeyCache::with_clock(clock.clone())))
    .with_hasher(cheap_hasher())
    .with_clock(clock);

    create_api_router(AppState::new(Arc::new(authenticator), ApiConfig::default()))
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

#[derive(Debug, Clone)]
enum AuthHeader {
    /// The account's own key
    ValidKey { bearer: bool },
    /// Well-formed key nobody owns
    UnknownKey(String),
    /// Arbitrary visible-ASCII value
    Garbage(String),
    /// `Bearer` with nothing after it
    EmptyBearer,
    None,
}

fn auth_header_strategy() -> impl Strategy<Value = AuthHeader> {
    prop_oneof![
        any::<bool>().prop_map(|bearer| AuthHeader::ValidKey { bearer }),
        arb_api_key().prop_map(AuthHeader::UnknownKey),
        "[!-~]{1,80}".prop_map(AuthHeader::Garbage),
        Just(AuthHeader::EmptyBearer),
        Just(AuthHeader::None),
    ]
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_authentication_enforcement(auth_header in auth_header_strategy()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (account, key) = plaintext_key_account("prop@example.test");
            let app = test_app(vec![account], 100);

            let mut builder = Request::builder().uri("/v1/account");
            let expected_message = match &auth_header {
                AuthHeader::ValidKey { bearer: true } => {
                    builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
                    None
                }
                AuthHeader::ValidKey { bearer: false } => {
                    builder = builder.header(header::AUTHORIZATION, key.clone());
                    None
                }
                AuthHeader::UnknownKey(unknown) => {
                    builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", unknown));
                    Some(Some("Unauthorized — please provide valid session or API key"))
                }
                AuthHeader::Garbage(value) => {
                    builder = builder.header(header::AUTHORIZATION, value.clone());
                    Some(None)
                }
                AuthHeader::EmptyBearer => {
                    builder = builder.header(header::AUTHORIZATION, "Bearer");
                    Some(Some("Invalid authorization format"))
                }
                AuthHeader::None => Some(Some("Missing authorization header")),
            };

            let request = builder
                .body(Body::empty())
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let response = app
                .oneshot(request)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            match expected_message {
                None => {
                    prop_assert_eq!(response.status(), StatusCode::OK);
                    prop_assert!(response.headers().contains_key("x-ratelimit-limit"));
                }
                Some(message) => {
                    prop_assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
                    let bytes = to_bytes(response.into_body(), usize::MAX)
                        .await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    let body: ErrorBody = serde_json::from_slice(&bytes)
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    if let Some(message) = message {
                        prop_assert_eq!(body.error, message);
                    }
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_ceiling_is_enforced_per_window(limit in 1u32..8, requests in 1usize..16) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (account, key) = plaintext_key_account("ceiling@example.test");
            let app = test_app(vec![account], limit);
            let authorization = format!("Bearer {}", key);

            let mut admitted = 0usize;
            for _ in 0..requests {
                let request = Request::builder()
                    .uri("/v1/account")
                    .header(header::AUTHORIZATION, authorization.as_str())
                    .body(Body::empty())
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let response = app
                    .clone()
                    .oneshot(request)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;

                match response.status() {
                    StatusCode::OK => {
                        admitted += 1;
                        let remaining = response
                            .headers()
                            .get("x-ratelimit-remaining")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<usize>().ok());
                        prop_assert_eq!(remaining, Some(limit as usize - admitted));
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        let retry_after = response
                            .headers()
                            .get(header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(0);
                        prop_assert!(retry_after >= 1);
                    }
                    other => prop_assert!(false, "unexpected status {}", other),
                }
            }

            prop_assert_eq!(admitted, requests.min(limit as usize));
            Ok::<(), TestCaseError>(())
        })?;
    }
}
