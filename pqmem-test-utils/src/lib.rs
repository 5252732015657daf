//! pqmem Test Utilities
//!
//! Shared test infrastructure for the pqmem workspace:
//! - Proptest generators for identities and key material
//! - Account fixtures with plaintext or hashed keys
//! - Mock collaborators that count calls or fail on demand

pub use pqmem_core::{
    api_key_prefix, generate_api_key, Account, AccountId, ApiKeyCredentials, ApiKeyHasher,
    AuthError, ManualClock, PqResult, RateLimitDecision, StoreError,
};
pub use pqmem_storage::{
    AccountStore, ApiKeyCache, InMemoryAccountStore, InMemoryApiKeyCache, SlidingWindowStore,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for pqmem types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_account_id() -> impl Strategy<Value = AccountId> {
        any::<[u8; 16]>().prop_map(|bytes| AccountId::new(Uuid::from_bytes(bytes)))
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z]{1,12}", "[a-z]{2,10}").prop_map(|(user, domain)| format!("{}@{}.test", user, domain))
    }

    pub fn arb_subject_id() -> impl Strategy<Value = String> {
        "user_[A-Za-z0-9]{8,24}"
    }

    /// Well-formed keys: `pq_` followed by 64 lowercase hex characters.
    pub fn arb_api_key() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}".prop_map(|hex| format!("pq_{}", hex))
    }

    /// Arbitrary `Authorization` values, printable ASCII only.
    pub fn arb_authorization_value() -> impl Strategy<Value = String> {
        prop_oneof![
            arb_api_key(),
            arb_api_key().prop_map(|key| format!("Bearer {}", key)),
            "[ -~]{0,80}",
        ]
    }

    pub fn arb_account() -> impl Strategy<Value = Account> {
        (
            arb_account_id(),
            arb_email(),
            proptest::option::of(arb_subject_id()),
        )
            .prop_map(|(id, email, subject)| {
                let account = Account::new(id, email);
                match subject {
                    Some(subject) => account.with_session_subject(subject),
                    None => account,
                }
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built accounts and helpers for common scenarios.

    use super::*;

    /// Argon2id with minimal cost so hash-path tests stay fast.
    pub fn cheap_hasher() -> ApiKeyHasher {
        ApiKeyHasher::with_params(1024, 1, 1).unwrap_or_default()
    }

    /// Account with no credentials.
    pub fn account(email: &str) -> Account {
        Account::new(AccountId::now_v7(), email)
    }

    /// Account reachable through a session subject.
    pub fn session_account(email: &str, subject_id: &str) -> Account {
        account(email).with_session_subject(subject_id)
    }

    /// Account with a legacy plaintext key. Returns the key alongside.
    pub fn plaintext_key_account(email: &str) -> (Account, String) {
        let key = generate_api_key();
        (account(email).with_plaintext_key(key.clone()), key)
    }

    /// Account with a hashed key. Returns the plaintext alongside.
    pub fn hashed_key_account(email: &str, hasher: &ApiKeyHasher) -> PqResult<(Account, String)> {
        let key = generate_api_key();
        let credentials = ApiKeyCredentials {
            hash: hasher.hash(&key)?,
            prefix: api_key_prefix(&key),
        };
        Ok((account(email).with_credentials(credentials), key))
    }

    /// Account with a hashed key whose prefix is forced to `prefix`.
    ///
    /// Builds prefix collisions without generating matching keys.
    pub fn hashed_key_account_with_prefix(
        email: &str,
        prefix: &str,
        hasher: &ApiKeyHasher,
    ) -> PqResult<Account> {
        let credentials = ApiKeyCredentials {
            hash: hasher.hash(&generate_api_key())?,
            prefix: prefix.to_string(),
        };
        Ok(account(email).with_credentials(credentials))
    }
}

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

pub mod mocks {
    //! Stores and caches that count, record or fail.

    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn database_down() -> StoreError {
        StoreError::Database {
            reason: "connection refused".to_string(),
        }
    }

    /// Call counts per [`AccountStore`] method.
    #[derive(Debug, Default)]
    pub struct StoreCalls {
        pub find_by_id: AtomicUsize,
        pub find_by_session_subject_id: AtomicUsize,
        pub find_by_api_key: AtomicUsize,
        pub find_many_by_api_key_prefix: AtomicUsize,
        pub store_api_key_credentials: AtomicUsize,
    }

    impl StoreCalls {
        pub fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    /// In-memory store that counts every call and records prefix-scan limits.
    #[derive(Debug, Default)]
    pub struct CountingAccountStore {
        inner: InMemoryAccountStore,
        pub calls: StoreCalls,
        prefix_limits: Mutex<Vec<usize>>,
    }

    impl CountingAccountStore {
        pub fn new(inner: InMemoryAccountStore) -> Self {
            Self {
                inner,
                calls: StoreCalls::default(),
                prefix_limits: Mutex::new(Vec::new()),
            }
        }

        pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
            Self::new(InMemoryAccountStore::with_accounts(accounts))
        }

        pub fn inner(&self) -> &InMemoryAccountStore {
            &self.inner
        }

        /// `limit` argument of every prefix scan so far.
        pub fn prefix_limits(&self) -> Vec<usize> {
            self.prefix_limits
                .lock()
                .map(|limits| limits.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl AccountStore for CountingAccountStore {
        async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
            self.calls.find_by_id.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_id(id).await
        }

        async fn find_by_session_subject_id(
            &self,
            subject_id: &str,
        ) -> Result<Option<Account>, StoreError> {
            self.calls
                .find_by_session_subject_id
                .fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_session_subject_id(subject_id).await
        }

        async fn find_by_api_key(&self, key: &str) -> Result<Option<Account>, StoreError> {
            self.calls.find_by_api_key.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_api_key(key).await
        }

        async fn find_many_by_api_key_prefix(
            &self,
            prefix: &str,
            limit: usize,
        ) -> Result<Vec<Account>, StoreError> {
            self.calls
                .find_many_by_api_key_prefix
                .fetch_add(1, Ordering::SeqCst);
            if let Ok(mut limits) = self.prefix_limits.lock() {
                limits.push(limit);
            }
            self.inner.find_many_by_api_key_prefix(prefix, limit).await
        }

        async fn store_api_key_credentials(
            &self,
            id: AccountId,
            credentials: &ApiKeyCredentials,
        ) -> Result<bool, StoreError> {
            self.calls
                .store_api_key_credentials
                .fetch_add(1, Ordering::SeqCst);
            self.inner.store_api_key_credentials(id, credentials).await
        }
    }

    /// Every call fails with a database error.
    #[derive(Debug, Clone, Default)]
    pub struct FailingAccountStore;

    #[async_trait]
    impl AccountStore for FailingAccountStore {
        async fn find_by_id(&self, _id: AccountId) -> Result<Option<Account>, StoreError> {
            Err(database_down())
        }

        async fn find_by_session_subject_id(
            &self,
            _subject_id: &str,
        ) -> Result<Option<Account>, StoreError> {
            Err(database_down())
        }

        async fn find_by_api_key(&self, _key: &str) -> Result<Option<Account>, StoreError> {
            Err(database_down())
        }

        async fn find_many_by_api_key_prefix(
            &self,
            _prefix: &str,
            _limit: usize,
        ) -> Result<Vec<Account>, StoreError> {
            Err(database_down())
        }

        async fn store_api_key_credentials(
            &self,
            _id: AccountId,
            _credentials: &ApiKeyCredentials,
        ) -> Result<bool, StoreError> {
            Err(database_down())
        }
    }

    /// Every call fails with a cache error.
    #[derive(Debug, Clone, Default)]
    pub struct FailingApiKeyCache;

    #[async_trait]
    impl ApiKeyCache for FailingApiKeyCache {
        async fn get(&self, _key: &str) -> Result<Option<AccountId>, StoreError> {
            Err(StoreError::Cache {
                reason: "cache unreachable".to_string(),
            })
        }

        async fn set_with_ttl(
            &self,
            _key: &str,
            _account_id: AccountId,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::Cache {
                reason: "cache unreachable".to_string(),
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Cache {
                reason: "cache unreachable".to_string(),
            })
        }
    }

    /// Sliding-window store that always errors and counts its calls.
    #[derive(Debug, Default)]
    pub struct FailingSlidingWindowStore {
        calls: AtomicUsize,
    }

    impl FailingSlidingWindowStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SlidingWindowStore for FailingSlidingWindowStore {
        async fn limit(&self, _identifier: &str) -> Result<RateLimitDecision, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::RateLimitStore {
                reason: "script timed out".to_string(),
            })
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    /// Returns a fixed decision and records every identifier it was asked about.
    #[derive(Debug)]
    pub struct RecordingSlidingWindow {
        decision: RateLimitDecision,
        identifiers: Mutex<Vec<String>>,
    }

    impl RecordingSlidingWindow {
        pub fn new(decision: RateLimitDecision) -> Self {
            Self {
                decision,
                identifiers: Mutex::new(Vec::new()),
            }
        }

        pub fn allowing(limit: u32) -> Self {
            Self::new(RateLimitDecision::allow(limit, limit.saturating_sub(1), None))
        }

        pub fn identifiers(&self) -> Vec<String> {
            self.identifiers
                .lock()
                .map(|ids| ids.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl SlidingWindowStore for RecordingSlidingWindow {
        async fn limit(&self, identifier: &str) -> Result<RateLimitDecision, StoreError> {
            if let Ok(mut ids) = self.identifiers.lock() {
                ids.push(identifier.to_string());
            }
            Ok(self.decision)
        }

        fn backend_name(&self) -> &'static str {
            "recording"
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
