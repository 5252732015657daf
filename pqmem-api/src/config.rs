//! API Configuration Module
//!
//! Runtime settings loaded from `PQ_*` environment variables with defaults
//! suitable for local development. Limits and timings that are not meant to
//! vary per deployment live in [`crate::constants`].

use pqmem_core::ConfigError;

use crate::constants::{DEFAULT_SESSION_CLOCK_SKEW_SECS, MIN_SESSION_SECRET_LENGTH};
use crate::session::SessionSecret;

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Deployment environment name (`development`, `production`, ...)
    pub environment: String,

    // ========================================================================
    // Distributed store
    // ========================================================================
    /// Redis / Dragonfly URL for the key cache and sliding-window counters.
    /// `None` keeps both in-process.
    pub redis_url: Option<String>,

    /// Record per-day allowed/blocked counts per account in Redis.
    pub rate_limit_analytics: bool,

    // ========================================================================
    // Sessions
    // ========================================================================
    /// Secret shared with the identity provider for HS256 session tokens.
    pub session_secret: SessionSecret,

    /// Tolerance applied to session token `exp` / `nbf`.
    pub session_clock_skew_secs: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            redis_url: None,
            rate_limit_analytics: false,
            session_secret: SessionSecret::insecure_default(),
            session_clock_skew_secs: DEFAULT_SESSION_CLOCK_SKEW_SECS,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `PQ_ENVIRONMENT`: deployment environment (default: development)
    /// - `PQ_REDIS_URL`, falling back to `REDIS_URL`: distributed store URL
    /// - `PQ_RATE_LIMIT_ANALYTICS`: "true" to record daily counters (default: false)
    /// - `PQ_SESSION_SECRET`: HS256 secret for session tokens
    /// - `PQ_SESSION_CLOCK_SKEW_SECS`: token time tolerance (default: 60)
    pub fn from_env() -> Self {
        let environment = std::env::var("PQ_ENVIRONMENT")
            .map(|s| s.trim().to_lowercase())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "development".to_string());

        let redis_url = std::env::var("PQ_REDIS_URL")
            .ok()
            .or_else(|| std::env::var("REDIS_URL").ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let rate_limit_analytics = std::env::var("PQ_RATE_LIMIT_ANALYTICS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let session_secret = std::env::var("PQ_SESSION_SECRET")
            .ok()
            .and_then(|s| SessionSecret::new(s).ok())
            .unwrap_or_else(SessionSecret::insecure_default);

        let session_clock_skew_secs = std::env::var("PQ_SESSION_CLOCK_SKEW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SESSION_CLOCK_SKEW_SECS);

        Self {
            environment,
            redis_url,
            rate_limit_analytics,
            session_secret,
            session_clock_skew_secs,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production" || self.environment == "prod"
    }

    /// Refuse to start in production with an unsafe session secret.
    ///
    /// Outside production the same problems are logged as warnings.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        let is_production = self.is_production();

        if self.session_secret.is_insecure_default() {
            if is_production {
                return Err(ConfigError::Insecure {
                    environment: self.environment.clone(),
                    reason: "PQ_SESSION_SECRET is not set".to_string(),
                });
            }
            tracing::warn!(
                "Using the insecure default session secret. Set PQ_SESSION_SECRET before deploying."
            );
            return Ok(());
        }

        if self.session_secret.len() < MIN_SESSION_SECRET_LENGTH {
            if is_production {
                return Err(ConfigError::Insecure {
                    environment: self.environment.clone(),
                    reason: format!(
                        "session secret is {} chars, at least {} required",
                        self.session_secret.len(),
                        MIN_SESSION_SECRET_LENGTH
                    ),
                });
            }
            tracing::warn!(
                length = self.session_secret.len(),
                "Session secret is short; production requires at least {} characters",
                MIN_SESSION_SECRET_LENGTH
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let previous = std::env::var(key).ok();
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    fn secret(value: &str) -> SessionSecret {
        SessionSecret::new(value.to_string()).unwrap_or_else(|_| SessionSecret::insecure_default())
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.environment, "development");
        assert!(config.redis_url.is_none());
        assert!(!config.rate_limit_analytics);
        assert!(config.session_secret.is_insecure_default());
        assert_eq!(config.session_clock_skew_secs, 60);
    }

    #[test]
    fn test_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _env = EnvVarGuard::set("PQ_ENVIRONMENT", Some("Production"));
        let _redis = EnvVarGuard::set("PQ_REDIS_URL", None);
        let _fallback = EnvVarGuard::set("REDIS_URL", Some("redis://cache:6379"));
        let _analytics = EnvVarGuard::set("PQ_RATE_LIMIT_ANALYTICS", Some("TRUE"));
        let _secret = EnvVarGuard::set("PQ_SESSION_SECRET", Some("s3cret"));
        let _skew = EnvVarGuard::set("PQ_SESSION_CLOCK_SKEW_SECS", Some("bogus"));

        let config = ApiConfig::from_env();
        assert!(config.is_production());
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert!(config.rate_limit_analytics);
        assert_eq!(config.session_secret.expose(), "s3cret");
        assert_eq!(config.session_clock_skew_secs, 60);
    }

    #[test]
    fn test_primary_redis_url_wins() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _redis = EnvVarGuard::set("PQ_REDIS_URL", Some("redis://primary:6379"));
        let _fallback = EnvVarGuard::set("REDIS_URL", Some("redis://fallback:6379"));

        let config = ApiConfig::from_env();
        assert_eq!(config.redis_url.as_deref(), Some("redis://primary:6379"));
    }

    #[test]
    fn test_production_validation_rejects_insecure_default() {
        let config = ApiConfig {
            environment: "production".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.validate_for_production().is_err());
    }

    #[test]
    fn test_production_validation_rejects_short_secret() {
        let config = ApiConfig {
            environment: "production".to_string(),
            session_secret: secret("short"),
            ..ApiConfig::default()
        };
        assert!(config.validate_for_production().is_err());
    }

    #[test]
    fn test_production_validation_accepts_strong_secret() {
        let config = ApiConfig {
            environment: "prod".to_string(),
            session_secret: secret("this-is-a-very-secure-secret-that-is-at-least-32-characters-long"),
            ..ApiConfig::default()
        };
        assert!(config.validate_for_production().is_ok());
    }

    #[test]
    fn test_production_validation_allows_development() {
        let config = ApiConfig::default();
        assert!(config.validate_for_production().is_ok());
    }
}
