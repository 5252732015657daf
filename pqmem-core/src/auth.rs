//! Per-request authentication outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Account, RateLimitDecision};

/// How the caller was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    Session,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ApiKey => "api_key",
            AuthMethod::Session => "session",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified, rate-limit-admitted caller.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub account: Account,
    pub method: AuthMethod,
    /// The decision that admitted this request
    pub rate_limit: RateLimitDecision,
}
