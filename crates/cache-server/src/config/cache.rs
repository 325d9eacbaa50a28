//! Cache store backend configuration.

use serde::{Deserialize, Serialize};

/// Which external store backs the cache-aside route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memcached,
    Redis,
    /// Process-local map; for development and tests only.
    #[serde(alias = "in-memory")]
    InMemory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: u32,
}

fn default_redis_pool_size() -> u32 {
    10
}
