// Library exports for the binary, integration tests and benchmarks

pub mod backends;
pub mod cache_key;
pub mod config;
pub mod metrics;
pub mod proxy;
pub mod store;

pub use cache_key::CacheKey;
pub use config::{Config, ConfigError};
pub use proxy::ProxyServer;
pub use store::{CacheStore, StoreError};
