//! Collaborator contracts consumed by the authenticator and rate limiter.

use async_trait::async_trait;
use pqmem_core::{Account, AccountId, ApiKeyCredentials, RateLimitDecision, StoreError};
use std::time::Duration;

/// Read access to accounts, plus the single write used by key rotation.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_by_session_subject_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Exact match on the legacy plaintext key column.
    async fn find_by_api_key(&self, key: &str) -> Result<Option<Account>, StoreError>;

    /// Accounts whose stored key prefix equals `prefix`, at most `limit` rows.
    async fn find_many_by_api_key_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Account>, StoreError>;

    /// Replace the key columns of an account with freshly issued credentials.
    ///
    /// Clears the plaintext column. Returns `false` when the account does not
    /// exist.
    async fn store_api_key_credentials(
        &self,
        id: AccountId,
        credentials: &ApiKeyCredentials,
    ) -> Result<bool, StoreError>;
}

/// Memoizes raw API key → account id.
#[async_trait]
pub trait ApiKeyCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AccountId>, StoreError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        account_id: AccountId,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Shared sliding-window counter.
///
/// One call both checks and records a request for `identifier`.
#[async_trait]
pub trait SlidingWindowStore: Send + Sync {
    async fn limit(&self, identifier: &str) -> Result<RateLimitDecision, StoreError>;

    /// Short backend label for logs and metrics.
    fn backend_name(&self) -> &'static str;
}
