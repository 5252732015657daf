//! Account records as seen by the authentication layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier (UUIDv7, timestamp-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Wrap an existing UUID.
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh UUIDv7 identifier.
    pub fn now_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A registered account.
///
/// Three API-key columns coexist:
/// - `api_key` holds a plaintext key for accounts created before hashing
///   was introduced (fast indexed lookup path)
/// - `api_key_hash` holds a PHC-format Argon2id hash of the current key
/// - `api_key_prefix` holds the first [`crate::API_KEY_PREFIX_LEN`] characters
///   of the current key and narrows the hash comparison to a few candidates
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    /// Subject identifier issued by the session provider
    pub session_subject_id: Option<String>,
    pub api_key: Option<String>,
    pub api_key_hash: Option<String>,
    pub api_key_prefix: Option<String>,
}

impl Account {
    /// Create an account with no credentials attached.
    pub fn new(id: AccountId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            session_subject_id: None,
            api_key: None,
            api_key_hash: None,
            api_key_prefix: None,
        }
    }

    pub fn with_session_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.session_subject_id = Some(subject_id.into());
        self
    }

    /// Attach a legacy plaintext key (also fills in the prefix column).
    pub fn with_plaintext_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key_prefix = Some(crate::api_key_prefix(&key));
        self.api_key = Some(key);
        self
    }

    /// Attach hashed key credentials, clearing any legacy plaintext key.
    pub fn with_credentials(mut self, credentials: ApiKeyCredentials) -> Self {
        self.apply_credentials(credentials);
        self
    }

    /// Replace the key columns with freshly issued credentials.
    pub fn apply_credentials(&mut self, credentials: ApiKeyCredentials) {
        self.api_key = None;
        self.api_key_hash = Some(credentials.hash);
        self.api_key_prefix = Some(credentials.prefix);
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.api_key_hash.is_some()
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("session_subject_id", &self.session_subject_id)
            .field("api_key", &self.api_key.as_deref().map(crate::mask_api_key))
            .field("api_key_hash", &self.api_key_hash.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_prefix", &self.api_key_prefix)
            .finish()
    }
}

/// Hash and prefix of a newly issued key, as persisted by the account store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyCredentials {
    pub hash: String,
    pub prefix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_roundtrip_through_string() -> Result<(), uuid::Error> {
        let id = AccountId::now_v7();
        let parsed: AccountId = id.to_string().parse()?;
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<AccountId>().is_err());
        Ok(())
    }

    #[test]
    fn test_plaintext_key_sets_prefix() {
        let key = format!("pq_{}", "ab".repeat(32));
        let account = Account::new(AccountId::now_v7(), "a@example.com").with_plaintext_key(&key);

        assert_eq!(account.api_key.as_deref(), Some(key.as_str()));
        assert_eq!(account.api_key_prefix.as_deref(), Some("pq_ababababa"));
        assert!(account.has_api_key());
    }

    #[test]
    fn test_credentials_clear_legacy_plaintext() {
        let key = format!("pq_{}", "cd".repeat(32));
        let account = Account::new(AccountId::now_v7(), "b@example.com")
            .with_plaintext_key(&key)
            .with_credentials(ApiKeyCredentials {
                hash: "$argon2id$v=19$stub".to_string(),
                prefix: "pq_00000000".to_string(),
            });

        assert!(account.api_key.is_none());
        assert_eq!(account.api_key_prefix.as_deref(), Some("pq_00000000"));
        assert!(account.api_key_hash.is_some());
    }

    #[test]
    fn test_debug_masks_secrets() {
        let key = format!("pq_{}", "ef".repeat(32));
        let account = Account::new(AccountId::now_v7(), "c@example.com")
            .with_plaintext_key(&key)
            .with_credentials(ApiKeyCredentials {
                hash: "$argon2id$secret-material".to_string(),
                prefix: "pq_efefefef".to_string(),
            });
        let rendered = format!("{:?}", account);

        assert!(!rendered.contains("secret-material"));
        assert!(!rendered.contains(&key));
        assert!(rendered.contains("[REDACTED]"));
    }
}
