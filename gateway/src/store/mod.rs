//! Key-value store abstraction.
//!
//! The gateway keeps cache entries, dependency sets, access statistics,
//! user context and alerts in a Redis-shaped store. [`MemoryStore`] is used
//! in tests and when no Redis URL is configured.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::config::StoreConfig;

/// Errors from a key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),
    #[error("Store command failed: {0}")]
    Command(String),
    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),
}

/// Async key-value store with Redis semantics.
///
/// String values, sets and hashes share one keyspace. Every key may carry an
/// expiry; expired keys behave as absent.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a string value with a time-to-live, replacing any previous value.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Set a key's time-to-live. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Build the configured store: Redis when a URL is set, otherwise in-memory.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KvStore>, StoreError> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            tracing::info!("Connected to Redis store at {}", url);
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("No Redis URL configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
