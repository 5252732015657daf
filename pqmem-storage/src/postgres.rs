//! PostgreSQL account store.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use pqmem_core::{Account, AccountId, ApiKeyCredentials, StoreError};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::traits::AccountStore;

// ============================================================================
// DATABASE CONFIGURATION
// ============================================================================

/// Database connection configuration.
#[derive(Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "pqmem".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("max_size", &self.max_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DbConfig {
    /// Read `PQ_DB_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PQ_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("PQ_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("PQ_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("PQ_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("PQ_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("PQ_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("PQ_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.timeout.as_secs()),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened until the first query.
    pub fn create_pool(&self) -> Result<Pool, StoreError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Columns read by the authentication layer.
///
/// The prefix index keeps the hash-verification scan to a handful of rows.
pub const ACCOUNTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id                  UUID PRIMARY KEY,
    email               TEXT NOT NULL UNIQUE,
    session_subject_id  TEXT UNIQUE,
    api_key             TEXT UNIQUE,
    api_key_hash        TEXT,
    api_key_prefix      TEXT
);
CREATE INDEX IF NOT EXISTS accounts_api_key_prefix_idx ON accounts (api_key_prefix);
"#;

const ACCOUNT_COLUMNS: &str =
    "id, email, session_subject_id, api_key, api_key_hash, api_key_prefix";

// ============================================================================
// ACCOUNT STORE
// ============================================================================

/// Account store over a deadpool-managed PostgreSQL pool.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: Pool,
}

impl PgAccountStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create the `accounts` table and prefix index if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.batch_execute(ACCOUNTS_SCHEMA).await.map_err(db_error)
    }

    /// Insert an account row (provisioning and test seeding).
    pub async fn insert(&self, account: &Account) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO accounts (id, email, session_subject_id, api_key, api_key_hash, api_key_prefix) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &account.id.as_uuid(),
                &account.email,
                &account.session_subject_id,
                &account.api_key,
                &account.api_key_hash,
                &account.api_key_prefix,
            ],
        )
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool {
            reason: e.to_string(),
        })
    }

    async fn query_single(
        &self,
        where_clause: &str,
        value: &(dyn tokio_postgres::types::ToSql + Sync),
    ) -> Result<Option<Account>, StoreError> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE {} LIMIT 1",
            ACCOUNT_COLUMNS, where_clause
        );
        let row = conn.query_opt(&sql, &[value]).await.map_err(db_error)?;
        row.as_ref().map(row_to_account).transpose()
    }
}

impl std::fmt::Debug for PgAccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgAccountStore")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.query_single("id = $1", &id.as_uuid()).await
    }

    async fn find_by_session_subject_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.query_single("session_subject_id = $1", &subject_id)
            .await
    }

    async fn find_by_api_key(&self, key: &str) -> Result<Option<Account>, StoreError> {
        self.query_single("api_key = $1", &key).await
    }

    async fn find_many_by_api_key_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Account>, StoreError> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE api_key_prefix = $1 ORDER BY id LIMIT $2",
            ACCOUNT_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(&sql, &[&prefix, &limit])
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_account).collect()
    }

    async fn store_api_key_credentials(
        &self,
        id: AccountId,
        credentials: &ApiKeyCredentials,
    ) -> Result<bool, StoreError> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE accounts SET api_key = NULL, api_key_hash = $2, api_key_prefix = $3 \
                 WHERE id = $1",
                &[&id.as_uuid(), &credentials.hash, &credentials.prefix],
            )
            .await
            .map_err(db_error)?;
        Ok(updated > 0)
    }
}

fn db_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Database {
        reason: e.to_string(),
    }
}

fn row_to_account(row: &Row) -> Result<Account, StoreError> {
    let id: Uuid = row.try_get("id").map_err(db_error)?;
    Ok(Account {
        id: AccountId::new(id),
        email: row.try_get("email").map_err(db_error)?,
        session_subject_id: row.try_get("session_subject_id").map_err(db_error)?,
        api_key: row.try_get("api_key").map_err(db_error)?,
        api_key_hash: row.try_get("api_key_hash").map_err(db_error)?,
        api_key_prefix: row.try_get("api_key_prefix").map_err(db_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_db_config_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _host = EnvVarGuard::set("PQ_DB_HOST", "db.internal");
        let _port = EnvVarGuard::set("PQ_DB_PORT", "6543");
        let _size = EnvVarGuard::set("PQ_DB_POOL_SIZE", "not-a-number");
        let _timeout = EnvVarGuard::set("PQ_DB_TIMEOUT", "5");

        let config = DbConfig::from_env();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.max_size, 16);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_db_config_debug_redacts_password() {
        let config = DbConfig {
            password: "hunter2".to_string(),
            ..DbConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_create_pool_is_lazy() -> Result<(), StoreError> {
        let store = PgAccountStore::from_config(&DbConfig::default())?;
        assert_eq!(store.pool_size(), 0);
        Ok(())
    }
}
