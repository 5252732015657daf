//! API key material.
//!
//! Keys look like `pq_` followed by 64 lowercase hex characters (32 random
//! bytes). The plaintext is shown to the user exactly once; afterwards only
//! the Argon2id hash and the indexable prefix are stored.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::RngCore;

use crate::error::AuthError;

/// Literal prefix of every issued key.
pub const API_KEY_LITERAL_PREFIX: &str = "pq_";

/// Number of random bytes behind each key.
pub const API_KEY_RANDOM_BYTES: usize = 32;

/// Number of leading characters stored in the prefix column.
///
/// Must stay identical between the write path and the lookup path or the
/// prefix scan silently stops matching.
pub const API_KEY_PREFIX_LEN: usize = 12;

/// Generate a new plaintext API key.
pub fn generate_api_key() -> String {
    let mut random_bytes = [0u8; API_KEY_RANDOM_BYTES];
    rand::rng().fill_bytes(&mut random_bytes);
    format!("{}{}", API_KEY_LITERAL_PREFIX, hex::encode(random_bytes))
}

/// Indexable prefix of a key.
///
/// Counts characters rather than bytes so arbitrary client input never
/// splits a UTF-8 sequence.
pub fn api_key_prefix(key: &str) -> String {
    key.chars().take(API_KEY_PREFIX_LEN).collect()
}

/// Check that a key has the issued shape (`pq_` + 64 lowercase hex).
pub fn is_well_formed_api_key(key: &str) -> bool {
    match key.strip_prefix(API_KEY_LITERAL_PREFIX) {
        Some(rest) => {
            rest.len() == API_KEY_RANDOM_BYTES * 2
                && rest
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        }
        None => false,
    }
}

/// Mask a key for logs and display (`pq_1a2b...9z8y`).
pub fn mask_api_key(key: &str) -> String {
    let char_count = key.chars().count();
    if char_count <= 12 {
        return "*".repeat(char_count);
    }

    match key.strip_prefix(API_KEY_LITERAL_PREFIX) {
        Some(rest) if rest.len() > 8 && rest.is_ascii() => format!(
            "{}{}...{}",
            API_KEY_LITERAL_PREFIX,
            &rest[..4],
            &rest[rest.len() - 4..]
        ),
        _ => {
            let head: String = key.chars().take(4).collect();
            let tail: String = key.chars().skip(char_count - 4).collect();
            format!("{}...{}", head, tail)
        }
    }
}

/// Argon2id hashing of API keys.
///
/// Hashing and verification are CPU-bound; async callers should run them on
/// a blocking thread.
#[derive(Debug, Clone)]
pub struct ApiKeyHasher {
    params: Params,
}

impl ApiKeyHasher {
    /// Memory cost in KiB (19 MiB)
    pub const MEMORY_COST: u32 = 19_456;
    /// Iterations
    pub const TIME_COST: u32 = 2;
    pub const PARALLELISM: u32 = 1;
    /// Output hash length in bytes
    pub const OUTPUT_LEN: usize = 32;
    const SALT_LEN: usize = 16;

    /// Hasher with the compiled-in cost parameters.
    pub fn new() -> Self {
        let params = Params::new(
            Self::MEMORY_COST,
            Self::TIME_COST,
            Self::PARALLELISM,
            Some(Self::OUTPUT_LEN),
        )
        .unwrap_or(Params::DEFAULT);

        Self { params }
    }

    /// Hasher with custom cost parameters (cheap settings for tests).
    pub fn with_params(
        memory_cost: u32,
        time_cost: u32,
        parallelism: u32,
    ) -> Result<Self, crate::ConfigError> {
        let params = Params::new(memory_cost, time_cost, parallelism, Some(Self::OUTPUT_LEN))
            .map_err(|e| crate::ConfigError::InvalidValue {
                field: "argon2_params".to_string(),
                value: format!("m={}, t={}, p={}", memory_cost, time_cost, parallelism),
                reason: e.to_string(),
            })?;
        Ok(Self { params })
    }

    /// Hash a plaintext key into a PHC string.
    pub fn hash(&self, key: &str) -> Result<String, AuthError> {
        let mut salt_bytes = [0u8; Self::SALT_LEN];
        rand::rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::internal(format!("salt encoding failed: {}", e)))?;

        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password(key.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::internal(format!("key hashing failed: {}", e)))
    }

    /// Compare a plaintext key against a stored PHC string.
    ///
    /// Cost parameters are read from the stored hash, so keys hashed under
    /// older settings keep verifying. An unparseable stored hash is an error,
    /// a mismatch is `Ok(false)`.
    pub fn verify(&self, key: &str, stored_hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| AuthError::internal(format!("stored key hash is malformed: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(key.as_bytes(), &parsed)
            .is_ok())
    }
}

impl Default for ApiKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cheap_hasher() -> ApiKeyHasher {
        ApiKeyHasher::with_params(1024, 1, 1).expect("cheap params are valid")
    }

    #[test]
    fn test_generated_keys_are_well_formed_and_unique() {
        let first = generate_api_key();
        let second = generate_api_key();

        assert_ne!(first, second);
        assert!(is_well_formed_api_key(&first));
        assert_eq!(first.len(), API_KEY_LITERAL_PREFIX.len() + 64);
    }

    #[test]
    fn test_prefix_is_first_twelve_characters() {
        let key = format!("pq_{}", "0123456789abcdef".repeat(4));
        assert_eq!(api_key_prefix(&key), "pq_012345678");
        assert_eq!(api_key_prefix("short"), "short");
        assert_eq!(api_key_prefix("ééééééééééééé").chars().count(), 12);
    }

    #[test]
    fn test_well_formed_rejects_other_shapes() {
        let hex = "a".repeat(64);
        assert!(is_well_formed_api_key(&format!("pq_{}", hex)));
        assert!(!is_well_formed_api_key(&format!("sk_{}", hex)));
        assert!(!is_well_formed_api_key(&format!("pq_{}", "A".repeat(64))));
        assert!(!is_well_formed_api_key(&format!("pq_{}", "a".repeat(63))));
        assert!(!is_well_formed_api_key(""));
    }

    #[test]
    fn test_mask_hides_middle() {
        let key = format!("pq_{}", "1234567890abcdef".repeat(4));
        let masked = mask_api_key(&key);
        assert_eq!(masked, "pq_1234...cdef");
        assert_eq!(mask_api_key("tiny"), "****");
    }

    #[test]
    fn test_hash_and_verify() -> Result<(), AuthError> {
        let hasher = cheap_hasher();
        let key = generate_api_key();
        let hash = hasher.hash(&key)?;

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(&key, &hash)?);
        assert!(!hasher.verify(&generate_api_key(), &hash)?);
        Ok(())
    }

    #[test]
    fn test_hashes_are_salted() -> Result<(), AuthError> {
        let hasher = cheap_hasher();
        let key = generate_api_key();
        assert_ne!(hasher.hash(&key)?, hasher.hash(&key)?);
        Ok(())
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        let hasher = cheap_hasher();
        assert!(hasher.verify("pq_anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_invalid_params_are_a_config_error() {
        assert!(ApiKeyHasher::with_params(0, 0, 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_prefix_never_exceeds_limit(key in ".{0,80}") {
            let prefix = api_key_prefix(&key);
            prop_assert!(prefix.chars().count() <= API_KEY_PREFIX_LEN);
            prop_assert!(key.starts_with(&prefix));
        }

        #[test]
        fn prop_mask_never_leaks_full_key(bytes in proptest::array::uniform32(any::<u8>())) {
            let key = format!("pq_{}", hex::encode(bytes));
            let masked = mask_api_key(&key);
            prop_assert!(masked.len() < key.len());
            prop_assert!(masked.starts_with("pq_"));
        }
    }
}
