//! Cache store backends.

mod inmemory;
mod memcached;
#[cfg(feature = "redis-backend")]
mod redis;

pub use inmemory::InMemoryStore;
pub use memcached::MemcachedStore;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisStore;
