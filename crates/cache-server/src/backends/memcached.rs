use crate::cache_key::CacheKey;
use crate::store::{CacheStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Memcached implementation of CacheStore.
///
/// The `memcache` client is blocking and keeps an r2d2 pool per node; keys
/// are distributed across nodes by the client's own hash. Every call is
/// moved onto the blocking thread pool so store latency never parks a
/// runtime worker.
pub struct MemcachedStore {
    client: Arc<memcache::Client>,
    expiration: u32,
}

impl MemcachedStore {
    /// Connect to all configured nodes.
    ///
    /// # Arguments
    /// * `hosts` - Node addresses, `host:port` or `memcache://host:port`
    /// * `pool_size` - Connections kept per node
    /// * `io_timeout` - Socket read/write timeout
    /// * `expiration` - Seconds passed on every write (0 = never expires)
    pub fn connect(
        hosts: &[String],
        pool_size: u32,
        io_timeout: Duration,
        expiration: u32,
    ) -> Result<Self, StoreError> {
        let urls: Vec<String> = hosts.iter().map(|host| memcache_url(host)).collect();

        let client = memcache::Client::with_pool_size(urls, pool_size)?;
        client.set_read_timeout(Some(io_timeout))?;
        client.set_write_timeout(Some(io_timeout))?;

        Ok(Self {
            client: Arc::new(client),
            expiration,
        })
    }
}

/// Normalize a configured node address into the URL form the client expects.
fn memcache_url(host: &str) -> String {
    let host = host.trim();
    if host.contains("://") {
        host.to_string()
    } else {
        format!("memcache://{host}")
    }
}

#[async_trait]
impl CacheStore for MemcachedStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let client = Arc::clone(&self.client);
        let key = key.as_str().to_owned();

        let value = tokio::task::spawn_blocking(move || client.get::<Vec<u8>>(&key)).await??;

        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &CacheKey, value: Bytes) -> Result<(), StoreError> {
        let client = Arc::clone(&self.client);
        let key = key.as_str().to_owned();
        let expiration = self.expiration;

        tokio::task::spawn_blocking(move || client.set(&key, &value[..], expiration)).await??;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memcached"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memcache_url_adds_scheme() {
        assert_eq!(memcache_url("127.0.0.1:11211"), "memcache://127.0.0.1:11211");
        assert_eq!(memcache_url(" mc-1:11211 "), "memcache://mc-1:11211");
    }

    #[test]
    fn test_memcache_url_keeps_explicit_scheme() {
        assert_eq!(
            memcache_url("memcache+udp://10.0.0.5:11211"),
            "memcache+udp://10.0.0.5:11211"
        );
    }
}
