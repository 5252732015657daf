//! In-process backends.
//!
//! [`InMemoryAccountStore`] backs tests and single-node development.
//! [`InMemoryApiKeyCache`] stands in for Redis when no distributed cache is
//! configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pqmem_core::{Account, AccountId, ApiKeyCredentials, Clock, StoreError, SystemClock};
use std::sync::Arc;
use std::time::Duration;

use crate::traits::{AccountStore, ApiKeyCache};

// ============================================================================
// ACCOUNT STORE
// ============================================================================

/// Account store held in a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountId, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert(account);
        }
        store
    }

    /// Insert or replace an account.
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn remove(&self, id: AccountId) -> Option<Account> {
        self.accounts.remove(&id).map(|(_, account)| account)
    }

    /// Snapshot of a single account.
    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn find_first(&self, predicate: impl Fn(&Account) -> bool) -> Option<Account> {
        self.accounts
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.get(id))
    }

    async fn find_by_session_subject_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self.find_first(|a| a.session_subject_id.as_deref() == Some(subject_id)))
    }

    async fn find_by_api_key(&self, key: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.find_first(|a| a.api_key.as_deref() == Some(key)))
    }

    async fn find_many_by_api_key_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Account>, StoreError> {
        let mut matches: Vec<Account> = self
            .accounts
            .iter()
            .filter(|entry| entry.value().api_key_prefix.as_deref() == Some(prefix))
            .map(|entry| entry.value().clone())
            .collect();

        // Map iteration order is arbitrary; keep candidate order stable.
        matches.sort_by_key(|a| a.id);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn store_api_key_credentials(
        &self,
        id: AccountId,
        credentials: &ApiKeyCredentials,
    ) -> Result<bool, StoreError> {
        match self.accounts.get_mut(&id) {
            Some(mut entry) => {
                entry.value_mut().apply_credentials(credentials.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// API KEY CACHE
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct CachedAccount {
    account_id: AccountId,
    expires_at: DateTime<Utc>,
}

/// Default probability that a write first sweeps expired entries.
const CACHE_SWEEP_PROBABILITY: f64 = 0.01;

/// TTL cache for API key lookups, local to this process.
///
/// Expired entries are dropped on read, and writes occasionally sweep the
/// whole map so keys that are never presented again do not accumulate.
pub struct InMemoryApiKeyCache {
    entries: DashMap<String, CachedAccount>,
    clock: Arc<dyn Clock>,
    sweep_probability: f64,
}

impl InMemoryApiKeyCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            sweep_probability: CACHE_SWEEP_PROBABILITY,
        }
    }

    /// Probability in `[0, 1]` that a write first sweeps expired entries.
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Drop every entry whose TTL has elapsed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryApiKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryApiKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryApiKeyCache")
            .field("entries", &self.entries.len())
            .field("sweep_probability", &self.sweep_probability)
            .finish()
    }
}

#[async_trait]
impl ApiKeyCache for InMemoryApiKeyCache {
    async fn get(&self, key: &str) -> Result<Option<AccountId>, StoreError> {
        let now = self.clock.now();
        let cached = self.entries.get(key).map(|entry| *entry.value());

        match cached {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.account_id)),
            Some(_) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        account_id: AccountId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::Cache {
            reason: format!("TTL out of range: {}", e),
        })?;
        let now = self.clock.now();

        if self.sweep_probability > 0.0 && rand::random::<f64>() < self.sweep_probability {
            self.sweep_expired(now);
        }

        self.entries.insert(
            key.to_string(),
            CachedAccount {
                account_id,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
