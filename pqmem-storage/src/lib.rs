//! pqmem Storage - Collaborator Traits and Backends
//!
//! Defines the account store, API-key cache and sliding-window counter
//! contracts used by the authentication layer, with PostgreSQL, Redis and
//! in-memory implementations.

pub mod memory;
pub mod postgres;
pub mod redis_store;
pub mod traits;

pub use memory::{InMemoryAccountStore, InMemoryApiKeyCache};
pub use postgres::{DbConfig, PgAccountStore, ACCOUNTS_SCHEMA};
pub use redis_store::{connect as connect_redis, RedisApiKeyCache, RedisSlidingWindow};
pub use traits::{AccountStore, ApiKeyCache, SlidingWindowStore};
