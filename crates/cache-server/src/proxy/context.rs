//! Shared, immutable per-process request state.

use super::client::HttpClient;
use super::forwarding::Forwarder;
use super::single_flight::SingleFlight;
use crate::config::{Config, ConfigError};
use crate::store::CacheStore;
use std::sync::Arc;

/// Everything a request handler needs, built once at startup.
pub struct ProxyContext {
    pub forwarder: Forwarder,
    pub store: Arc<dyn CacheStore>,
    /// Present when `single-flight` is enabled.
    pub single_flight: Option<SingleFlight>,
    pub cache_path: String,
    pub input_param: String,
    pub key_prefix: String,
    pub max_body_bytes: usize,
}

impl ProxyContext {
    pub fn new(
        config: &Config,
        client: HttpClient,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, ConfigError> {
        let origin = config.upstream_origin()?;
        Ok(Self {
            forwarder: Forwarder::new(client, origin),
            store,
            single_flight: config.single_flight.then(SingleFlight::new),
            cache_path: config.cache_path.clone(),
            input_param: config.input_param.clone(),
            key_prefix: config.key_prefix.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Whether `path` is served by the cache-aside handler.
    pub fn is_cache_path(&self, path: &str) -> bool {
        path == self.cache_path
    }
}
