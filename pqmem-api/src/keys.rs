//! API key issuance and rotation.

use pqmem_core::{
    api_key_prefix, generate_api_key, mask_api_key, AccountId, ApiKeyCredentials, AuthError,
    PqResult,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::authenticator::Authenticator;
use crate::metrics::with_metrics;

/// A freshly issued key. The plaintext is never retrievable again.
#[derive(Clone, Serialize)]
pub struct IssuedApiKey {
    pub key: String,
    pub prefix: String,
}

impl std::fmt::Debug for IssuedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedApiKey")
            .field("key", &mask_api_key(&self.key))
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Issues replacement keys and retires old ones.
#[derive(Debug, Clone)]
pub struct ApiKeyManager {
    authenticator: Arc<Authenticator>,
}

impl ApiKeyManager {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Replace the account's key with a new one.
    ///
    /// Only the hash and prefix are persisted; the legacy plaintext column is
    /// cleared. Returns `Ok(None)` when the account does not exist.
    pub async fn rotate(
        &self,
        account_id: AccountId,
        previous_key: Option<&str>,
    ) -> PqResult<Option<IssuedApiKey>> {
        let result = self.rotate_inner(account_id, previous_key).await;
        with_metrics(|m| m.record_key_rotation(matches!(result, Ok(Some(_)))));
        result
    }

    async fn rotate_inner(
        &self,
        account_id: AccountId,
        previous_key: Option<&str>,
    ) -> PqResult<Option<IssuedApiKey>> {
        let key = generate_api_key();
        let prefix = api_key_prefix(&key);

        let hasher = self.authenticator.hasher().clone();
        let to_hash = key.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&to_hash))
            .await
            .map_err(|e| AuthError::internal(format!("key hashing task failed: {}", e)))??;

        let credentials = ApiKeyCredentials {
            hash,
            prefix: prefix.clone(),
        };

        let stored = self
            .authenticator
            .accounts()
            .store_api_key_credentials(account_id, &credentials)
            .await?;
        if !stored {
            return Ok(None);
        }

        match previous_key {
            Some(previous) => self.authenticator.invalidate_cached_key(previous).await?,
            None => self.authenticator.invalidate_for_account(account_id).await,
        }

        info!(%account_id, prefix = %prefix, "API key rotated");
        Ok(Some(IssuedApiKey { key, prefix }))
    }
}
