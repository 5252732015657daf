//! pqmem Core - Identity Types for Request Authentication
//!
//! Shared vocabulary for the authentication layer:
//! - [`Account`] and [`AccountId`], the unit of identity and billing
//! - API key material: generation, prefixes, masking and Argon2id hashing
//! - [`AuthMethod`] / [`AuthResult`], produced once per request
//! - [`RateLimitDecision`], the answer of every rate-limit check
//! - [`AuthError`] and [`StoreError`], the error taxonomy
//! - [`Clock`], so window and token timing can be driven from tests

pub mod account;
pub mod api_key;
pub mod auth;
pub mod clock;
pub mod error;
pub mod rate_limit;

pub use account::{Account, AccountId, ApiKeyCredentials};
pub use api_key::{
    api_key_prefix, generate_api_key, is_well_formed_api_key, mask_api_key, ApiKeyHasher,
    API_KEY_LITERAL_PREFIX, API_KEY_PREFIX_LEN, API_KEY_RANDOM_BYTES,
};
pub use auth::{AuthMethod, AuthResult};
pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use error::{AuthError, ConfigError, InvalidCredentials, PqResult, StoreError};
pub use rate_limit::{RateLimitDecision, DEFAULT_RETRY_AFTER_SECS};
