//! Cache store capability used by the cache-aside route.
//!
//! The proxy only ever reads and writes whole entries by key; sharding,
//! eviction and expiry belong to the backend.

use crate::cache_key::CacheKey;
use crate::config::{CacheBackend, Config};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("memcached: {0}")]
    Memcached(#[from] memcache::MemcacheError),

    #[cfg(feature = "redis-backend")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "redis-backend")]
    #[error("redis pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("store task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Backend-agnostic key/value store holding upstream response bodies.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the entry stored under `key`, if any.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &CacheKey, value: Bytes) -> Result<(), StoreError>;

    /// Short backend name for logs and metrics labels.
    fn backend(&self) -> &'static str;
}

/// Create a CacheStore based on configuration.
///
/// Connecting is blocking for the pooled backends; call from
/// `spawn_blocking` when already inside the runtime.
pub fn create_cache_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    let expiration = Duration::from_secs(u64::from(config.cache_expiration_secs));
    let io_timeout = Duration::from_millis(config.store_timeout_ms);

    match config.cache_backend {
        CacheBackend::Memcached => {
            use crate::backends::MemcachedStore;

            let store = MemcachedStore::connect(
                &config.memcached_host,
                config.memcached_pool_size,
                io_timeout,
                config.cache_expiration_secs,
            )
            .context("Failed to create memcached store")?;

            tracing::info!(
                nodes = config.memcached_host.len(),
                pool_size = config.memcached_pool_size,
                expiration_secs = config.cache_expiration_secs,
                "Using memcached cache store"
            );
            Ok(Arc::new(store))
        }
        CacheBackend::Redis => {
            #[cfg(feature = "redis-backend")]
            {
                use crate::backends::RedisStore;

                let redis_config = config
                    .redis
                    .as_ref()
                    .context("Redis backend selected but no redis config provided")?;

                let store = RedisStore::connect(
                    &redis_config.url,
                    redis_config.pool_size,
                    io_timeout,
                    config.cache_expiration_secs,
                )
                .context("Failed to create redis store")?;

                tracing::info!(
                    url = %redis_config.url,
                    pool_size = redis_config.pool_size,
                    expiration_secs = config.cache_expiration_secs,
                    "Using redis cache store"
                );
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "redis-backend"))]
            {
                anyhow::bail!("Redis backend not available. Compile with --features redis-backend")
            }
        }
        CacheBackend::InMemory => {
            use crate::backends::InMemoryStore;

            tracing::info!(
                expiration_secs = config.cache_expiration_secs,
                "Using in-memory cache store"
            );
            Ok(Arc::new(InMemoryStore::new(expiration)))
        }
    }
}
