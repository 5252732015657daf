//! Error types for pqmem authentication

use thiserror::Error;

/// Why a presented credential was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidCredentials {
    /// `Authorization` header present but carried no key
    MalformedHeader,
    /// Key did not resolve to any account
    UnknownApiKey,
    /// Neither a session nor an API key identified an account
    NoValidCredentials,
}

impl InvalidCredentials {
    pub fn message(&self) -> &'static str {
        match self {
            InvalidCredentials::MalformedHeader => "Invalid authorization format",
            InvalidCredentials::UnknownApiKey => "Invalid API key",
            InvalidCredentials::NoValidCredentials => {
                "Unauthorized — please provide valid session or API key"
            }
        }
    }

    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidCredentials::MalformedHeader => "malformed_header",
            InvalidCredentials::UnknownApiKey => "unknown_api_key",
            InvalidCredentials::NoValidCredentials => "no_valid_credentials",
        }
    }
}

/// Authentication outcome errors.
///
/// `Display` renders the message returned to clients. Internal failure
/// reasons are kept for logging and never rendered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,

    #[error("{}", .0.message())]
    InvalidCredentials(InvalidCredentials),

    #[error("Rate limit exceeded. Try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed")]
    InternalFailure { reason: String },
}

impl AuthError {
    pub fn internal(reason: impl Into<String>) -> Self {
        AuthError::InternalFailure {
            reason: reason.into(),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::MissingCredentials | AuthError::InvalidCredentials(_) => 401,
            AuthError::RateLimited { .. } => 429,
            AuthError::InternalFailure { .. } => 500,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidCredentials(kind) => kind.as_str(),
            AuthError::RateLimited { .. } => "rate_limited",
            AuthError::InternalFailure { .. } => "internal_failure",
        }
    }

    /// True for the "nothing identified the caller" family of 401s.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::MissingCredentials | AuthError::InvalidCredentials(_)
        )
    }
}

impl From<InvalidCredentials> for AuthError {
    fn from(kind: InvalidCredentials) -> Self {
        AuthError::InvalidCredentials(kind)
    }
}

/// Failures of external collaborators (account store, cache, counters).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Connection pool error: {reason}")]
    Pool { reason: String },

    #[error("Cache error: {reason}")]
    Cache { reason: String },

    #[error("Rate-limit store error: {reason}")]
    RateLimitStore { reason: String },
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::InternalFailure {
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Insecure configuration for {environment}: {reason}")]
    Insecure { environment: String, reason: String },
}

/// Result type alias for authentication operations.
pub type PqResult<T> = Result<T, AuthError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_messages() {
        assert_eq!(
            AuthError::MissingCredentials.to_string(),
            "Missing authorization header"
        );
        assert_eq!(
            AuthError::from(InvalidCredentials::MalformedHeader).to_string(),
            "Invalid authorization format"
        );
        assert_eq!(
            AuthError::from(InvalidCredentials::UnknownApiKey).to_string(),
            "Invalid API key"
        );
        assert_eq!(
            AuthError::RateLimited {
                retry_after_secs: 17
            }
            .to_string(),
            "Rate limit exceeded. Try again in 17 seconds"
        );
    }

    #[test]
    fn test_internal_reason_is_not_rendered() {
        let err = AuthError::internal("connection refused to 10.0.0.3:5432");
        let msg = format!("{}", err);
        assert_eq!(msg, "Authentication failed");
        assert!(!msg.contains("10.0.0.3"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingCredentials.status_code(), 401);
        assert_eq!(
            AuthError::from(InvalidCredentials::NoValidCredentials).status_code(),
            401
        );
        assert_eq!(
            AuthError::RateLimited {
                retry_after_secs: 1
            }
            .status_code(),
            429
        );
        assert_eq!(AuthError::internal("x").status_code(), 500);
    }

    #[test]
    fn test_store_error_becomes_internal_failure() {
        let err = AuthError::from(StoreError::Database {
            reason: "timeout".to_string(),
        });
        match err {
            AuthError::InternalFailure { reason } => assert!(reason.contains("timeout")),
            other => panic!("expected InternalFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_config_error_display_insecure() {
        let err = ConfigError::Insecure {
            environment: "production".to_string(),
            reason: "session secret is the development default".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("production"));
        assert!(msg.contains("development default"));
    }
}
