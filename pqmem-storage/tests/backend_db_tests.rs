#![cfg(feature = "db-tests")]
//! Tests against live PostgreSQL and Redis.
//!
//! Run with `--features db-tests` and `PQ_DB_*` / `PQ_REDIS_URL` pointing at
//! disposable instances.

use pqmem_core::{Account, AccountId, ApiKeyCredentials};
use pqmem_storage::{
    connect_redis, AccountStore, ApiKeyCache, DbConfig, PgAccountStore, RedisApiKeyCache,
    RedisSlidingWindow, SlidingWindowStore,
};
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("PQ_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn pg_store() -> PgAccountStore {
    let store = PgAccountStore::from_config(&DbConfig::from_env()).expect("pool");
    store.ensure_schema().await.expect("schema");
    store
}

#[tokio::test]
async fn test_pg_lookup_paths() {
    let store = pg_store().await;
    let id = AccountId::now_v7();
    let key = format!("pq_{}", hex_of(id));
    let account = Account::new(id, format!("{}@example.com", id))
        .with_session_subject(format!("user_{}", id))
        .with_plaintext_key(&key);
    store.insert(&account).await.expect("insert");

    let by_id = store.find_by_id(id).await.expect("by id");
    assert_eq!(by_id.map(|a| a.email), Some(account.email.clone()));

    let by_subject = store
        .find_by_session_subject_id(&format!("user_{}", id))
        .await
        .expect("by subject");
    assert_eq!(by_subject.map(|a| a.id), Some(id));

    let by_key = store.find_by_api_key(&key).await.expect("by key");
    assert_eq!(by_key.map(|a| a.id), Some(id));
}

#[tokio::test]
async fn test_pg_store_credentials() {
    let store = pg_store().await;
    let id = AccountId::now_v7();
    let key = format!("pq_{}", hex_of(id));
    store
        .insert(&Account::new(id, format!("{}@example.com", id)).with_plaintext_key(&key))
        .await
        .expect("insert");

    let credentials = ApiKeyCredentials {
        hash: "$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA".to_string(),
        prefix: pqmem_core::api_key_prefix(&key),
    };
    assert!(store
        .store_api_key_credentials(id, &credentials)
        .await
        .expect("update"));
    assert!(store.find_by_api_key(&key).await.expect("by key").is_none());

    let candidates = store
        .find_many_by_api_key_prefix(&credentials.prefix, 10)
        .await
        .expect("prefix scan");
    assert!(candidates.iter().any(|a| a.id == id));
}

#[tokio::test]
async fn test_redis_cache_roundtrip() {
    let conn = connect_redis(&redis_url()).await.expect("redis");
    let cache = RedisApiKeyCache::new(conn);
    let id = AccountId::now_v7();
    let key = format!("pq_test_{}", id);

    cache
        .set_with_ttl(&key, id, Duration::from_secs(5))
        .await
        .expect("set");
    assert_eq!(cache.get(&key).await.expect("get"), Some(id));
    cache.delete(&key).await.expect("delete");
    assert_eq!(cache.get(&key).await.expect("get"), None);
}

#[tokio::test]
async fn test_redis_sliding_window_rejects_over_limit() {
    let conn = connect_redis(&redis_url()).await.expect("redis");
    let window = RedisSlidingWindow::new(conn, 3, Duration::from_secs(60)).with_analytics(true);
    let identifier = AccountId::now_v7().to_string();

    for expected_remaining in [2, 1, 0] {
        let decision = window.limit(&identifier).await.expect("limit");
        assert!(decision.allowed);
        assert!(decision.remaining <= expected_remaining);
    }

    let rejected = window.limit(&identifier).await.expect("limit");
    assert!(!rejected.allowed);
    assert_eq!(rejected.remaining, 0);
    assert!(rejected.reset_at.is_some());
}

fn hex_of(id: AccountId) -> String {
    let simple = id.as_uuid().simple().to_string();
    format!("{}{}", simple, simple)
}
