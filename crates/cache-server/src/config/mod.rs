//! Configuration types for cache-server.

mod cache;
mod listen;
mod upstream;

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::cache_key::CacheKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{CacheBackend, RedisConfig};
pub use listen::MetricsConfig;
pub use upstream::{ConnectionPoolConfig, UpstreamOrigin};

const MEMCACHED_MAX_KEY_LEN: usize = 250;

/// Default configuration file, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file '{}' does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read configuration file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Upstream origin every request is forwarded to.
    #[serde(default)]
    pub hash_server_host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_backlog")]
    pub backlog: i32,

    /// Memcached nodes, `host:port` or `memcache://host:port`.
    #[serde(default)]
    pub memcached_host: Vec<String>,

    #[serde(default = "default_memcached_pool_size")]
    pub memcached_pool_size: u32,

    #[serde(default)]
    pub cache_backend: CacheBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,

    /// Read/write timeout applied to store connections.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Exact request path served by the cache-aside handler.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,

    /// Form parameter the cache key is derived from.
    #[serde(default = "default_input_param")]
    pub input_param: String,

    #[serde(default)]
    pub key_prefix: String,

    /// Expiration handed to the store on write; 0 leaves lifetime to the store.
    #[serde(default)]
    pub cache_expiration_secs: u32,

    /// Share one upstream call between concurrent misses for the same key.
    #[serde(default)]
    pub single_flight: bool,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_port() -> u16 {
    80
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_backlog() -> i32 {
    1024
}

fn default_memcached_pool_size() -> u32 {
    16
}

fn default_store_timeout_ms() -> u64 {
    1000
}

fn default_cache_path() -> String {
    "/calc".to_string()
}

fn default_input_param() -> String {
    "input".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_server_host: String::new(),
            port: default_port(),
            bind_address: default_bind_address(),
            backlog: default_backlog(),
            memcached_host: Vec::new(),
            memcached_pool_size: default_memcached_pool_size(),
            cache_backend: CacheBackend::default(),
            redis: None,
            store_timeout_ms: default_store_timeout_ms(),
            cache_path: default_cache_path(),
            input_param: default_input_param(),
            key_prefix: String::new(),
            cache_expiration_secs: 0,
            single_flight: false,
            max_body_bytes: default_max_body_bytes(),
            connection_pool: ConnectionPoolConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.upstream_origin()?;

        match self.cache_backend {
            CacheBackend::Memcached => {
                if self.memcached_host.is_empty() {
                    return Err(ConfigError::Invalid(
                        "memcached-host must not be empty".to_string(),
                    ));
                }
                if let Some(index) = self
                    .memcached_host
                    .iter()
                    .position(|host| host.trim().is_empty())
                {
                    return Err(ConfigError::Invalid(format!(
                        "memcached-host[{index}] must not be empty"
                    )));
                }
                if self.memcached_pool_size == 0 {
                    return Err(ConfigError::Invalid(
                        "memcached-pool-size must be greater than 0".to_string(),
                    ));
                }
                self.validate_memcached_key_prefix()?;
            }
            CacheBackend::Redis => {
                if !cfg!(feature = "redis-backend") {
                    return Err(ConfigError::Invalid(
                        "cache-backend 'redis' requires the 'redis-backend' feature".to_string(),
                    ));
                }
                let redis = self.redis.as_ref().ok_or_else(|| {
                    ConfigError::Invalid(
                        "a 'redis' section is required when cache-backend is 'redis'".to_string(),
                    )
                })?;
                if redis.url.trim().is_empty() {
                    return Err(ConfigError::Invalid("redis.url must not be empty".to_string()));
                }
                if redis.pool_size == 0 {
                    return Err(ConfigError::Invalid(
                        "redis.pool-size must be greater than 0".to_string(),
                    ));
                }
            }
            CacheBackend::InMemory => {}
        }

        if !self.cache_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "cache-path '{}' must start with '/'",
                self.cache_path
            )));
        }

        if self.input_param.is_empty() {
            return Err(ConfigError::Invalid(
                "input-param must not be empty".to_string(),
            ));
        }

        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store-timeout-ms must be greater than 0".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max-body-bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Memcached keys are at most 250 bytes with no whitespace or control
    /// characters; every key is `key-prefix` followed by the hex digest.
    fn validate_memcached_key_prefix(&self) -> Result<(), ConfigError> {
        if self
            .key_prefix
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ConfigError::Invalid(format!(
                "key-prefix '{}' must not contain whitespace or control characters",
                self.key_prefix.escape_debug()
            )));
        }

        let max_prefix = MEMCACHED_MAX_KEY_LEN - CacheKey::DIGEST_LEN;
        if self.key_prefix.len() > max_prefix {
            return Err(ConfigError::Invalid(format!(
                "key-prefix is {} bytes, memcached allows at most {max_prefix}",
                self.key_prefix.len()
            )));
        }

        Ok(())
    }

    pub fn upstream_origin(&self) -> Result<UpstreamOrigin, ConfigError> {
        UpstreamOrigin::parse(&self.hash_server_host)
    }
}
