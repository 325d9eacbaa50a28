//! Per-key de-duplication of concurrent cache misses.
//!
//! The first miss for a key becomes the leader and performs the upstream
//! call; misses arriving while it is in flight subscribe to its result
//! instead of forwarding again. The table entry is removed when the leader's
//! guard drops, whether or not it published a result.

use crate::cache_key::CacheKey;
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use hyper::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::watch;

/// Upstream answer captured on the cache-aside path.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

type Slot = watch::Receiver<Option<Fetched>>;

#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<CacheKey, Slot>>,
}

pub enum Flight<'a> {
    /// Caller must fetch and publish through the guard.
    Leader(FlightGuard<'a>),
    /// Another request is already fetching this key.
    Follower(Slot),
}

pub struct FlightGuard<'a> {
    table: &'a SingleFlight,
    key: CacheKey,
    tx: watch::Sender<Option<Fetched>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &CacheKey) -> Flight<'_> {
        let mut inflight = self.inflight.lock();
        if let Some(slot) = inflight.get(key) {
            return Flight::Follower(slot.clone());
        }

        let (tx, rx) = watch::channel(None);
        inflight.insert(key.clone(), rx);
        Flight::Leader(FlightGuard {
            table: self,
            key: key.clone(),
            tx,
        })
    }

    /// Number of keys currently being fetched.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl FlightGuard<'_> {
    /// Hand the result to every follower and release the key.
    pub fn complete(self, fetched: Fetched) {
        // Followers may all be gone already; nothing to do then.
        let _ = self.tx.send(Some(fetched));
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.table.inflight.lock().remove(&self.key);
    }
}

/// Wait for the leader's result. `None` when the leader gave up without one.
pub async fn wait_for_leader(mut slot: Slot) -> Option<Fetched> {
    match slot.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn fetched(body: &'static str) -> Fetched {
        Fetched {
            status: StatusCode::OK,
            content_type: None,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_first_joiner_leads() {
        let flights = SingleFlight::new();
        let key = CacheKey::from_input(b"a");

        let first = flights.join(&key);
        assert!(matches!(first, Flight::Leader(_)));
        assert!(matches!(flights.join(&key), Flight::Follower(_)));
        assert_eq!(flights.in_flight(), 1);

        drop(first);
        assert_eq!(flights.in_flight(), 0);
        assert!(matches!(flights.join(&key), Flight::Leader(_)));
    }

    #[test]
    fn test_distinct_keys_lead_independently() {
        let flights = SingleFlight::new();
        let a = flights.join(&CacheKey::from_input(b"a"));
        let b = flights.join(&CacheKey::from_input(b"b"));
        assert!(matches!(a, Flight::Leader(_)));
        assert!(matches!(b, Flight::Leader(_)));
        assert_eq!(flights.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_followers_receive_leader_result() {
        let flights = Arc::new(SingleFlight::new());
        let key = CacheKey::from_input(b"shared");

        let Flight::Leader(guard) = flights.join(&key) else {
            panic!("expected leader");
        };
        let Flight::Follower(slot) = flights.join(&key) else {
            panic!("expected follower");
        };

        let waiter = tokio::spawn(wait_for_leader(slot));
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.complete(fetched("payload"));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.body, Bytes::from_static(b"payload"));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_followers_see_abandoned_leader() {
        let flights = SingleFlight::new();
        let key = CacheKey::from_input(b"abandoned");

        let leader = flights.join(&key);
        let Flight::Follower(slot) = flights.join(&key) else {
            panic!("expected follower");
        };
        drop(leader);

        assert!(wait_for_leader(slot).await.is_none());
    }
}
