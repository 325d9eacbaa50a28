use crate::cache_key::CacheKey;
use crate::store::{CacheStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// In-memory implementation of CacheStore
///
/// Entries live in a HashMap with an optional expiry. Useful for development,
/// single-instance deployments and tests; the read/write counters let tests
/// assert exactly how often the store was touched.
pub struct InMemoryStore {
    data: RwLock<HashMap<String, (Bytes, Option<Instant>)>>,
    ttl: Option<Duration>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl InMemoryStore {
    /// `ttl` of zero keeps entries until the process exits.
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            ttl: (!ttl.is_zero()).then_some(ttl),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Insert an entry directly, bypassing the write counter.
    pub fn seed(&self, key: &CacheKey, value: impl Into<Bytes>) {
        self.data
            .write()
            .insert(key.as_str().to_owned(), (value.into(), None));
    }

    /// Number of `get` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `set` calls served.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read();
        match data.get(key.as_str()) {
            Some((_, Some(expiry))) if Instant::now() >= *expiry => Ok(None),
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, value: Bytes) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let expiry = self.ttl.map(|ttl| Instant::now() + ttl);
        self.data
            .write()
            .insert(key.as_str().to_owned(), (value, expiry));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "inmemory"
    }
}
