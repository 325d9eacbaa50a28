use crate::cache_key::CacheKey;
use crate::store::{CacheStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Redis implementation of CacheStore using the synchronous client pooled by
/// r2d2. Calls run on the blocking thread pool.
///
/// # Compatibility
///
/// - Redis 6.x, 7.x: Fully supported
/// - Valkey: Likely compatible but not officially supported
pub struct RedisStore {
    pool: r2d2::Pool<redis::Client>,
    expiration_secs: u64,
}

impl RedisStore {
    /// Create a new Redis store
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g. "redis://localhost:6379")
    /// * `pool_size` - Connection pool size
    /// * `io_timeout` - Socket read/write timeout, also the pool checkout bound
    /// * `expiration_secs` - `EX` applied on write (0 = no expiry)
    pub fn connect(
        url: &str,
        pool_size: u32,
        io_timeout: Duration,
        expiration_secs: u32,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;

        let pool = r2d2::Pool::builder()
            .max_size(pool_size)
            .connection_timeout(io_timeout.max(Duration::from_secs(1)))
            .connection_customizer(Box::new(SocketTimeouts(io_timeout)))
            .build(client)?;

        Ok(Self {
            pool,
            expiration_secs: u64::from(expiration_secs),
        })
    }
}

/// Applies read/write timeouts to every connection handed out by the pool.
#[derive(Debug)]
struct SocketTimeouts(Duration);

impl r2d2::CustomizeConnection<redis::Connection, redis::RedisError> for SocketTimeouts {
    fn on_acquire(&self, conn: &mut redis::Connection) -> Result<(), redis::RedisError> {
        conn.set_read_timeout(Some(self.0))?;
        conn.set_write_timeout(Some(self.0))
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        let pool = self.pool.clone();
        let key = key.as_str().to_owned();

        let value = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
            let mut conn = pool.get()?;
            let value = redis::cmd("GET").arg(&key).query(&mut *conn)?;
            Ok(value)
        })
        .await??;

        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &CacheKey, value: Bytes) -> Result<(), StoreError> {
        let pool = self.pool.clone();
        let key = key.as_str().to_owned();
        let expiration_secs = self.expiration_secs;

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = pool.get()?;
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(&value[..]);
            if expiration_secs > 0 {
                cmd.arg("EX").arg(expiration_secs);
            }
            cmd.query::<()>(&mut *conn)?;
            Ok(())
        })
        .await??;

        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
