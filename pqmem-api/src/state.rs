//! Shared application state for Axum routers.

use std::sync::Arc;

use crate::authenticator::Authenticator;
use crate::config::ApiConfig;
use crate::keys::ApiKeyManager;

/// Application-wide state shared across all routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub keys: Arc<ApiKeyManager>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(authenticator: Arc<Authenticator>, config: ApiConfig) -> Self {
        let keys = Arc::new(ApiKeyManager::new(authenticator.clone()));
        Self {
            authenticator,
            keys,
            config: Arc::new(config),
        }
    }
}
