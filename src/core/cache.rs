//! Read-through entity cache with an explicit invalidation contract.
//!
//! The cache is a capability the engine calls, never a hidden global.
//! Keys are derived from entity identity (`project:{id}`, `reward:{id}`);
//! any write to an entity invalidates exactly those keys. Values are the
//! entity's JSON serialization. The cache only ever serves read paths —
//! capacity/headcount decisions always happen in-transaction against
//! ledger rows.

use rustc_hash::FxHashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait EntityCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    fn invalidate(&self, key: &str);
}

pub fn project_key(id: &str) -> String {
    format!("project:{}", id)
}

pub fn reward_key(id: &str) -> String {
    format!("reward:{}", id)
}

/// In-process TTL map. Expired entries are dropped lazily on lookup.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<FxHashMap<String, (Instant, String)>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl EntityCache for TtlCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((stamp, value)) if stamp.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: String) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), (Instant::now(), value));
    }

    fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
    }
}

/// Cache that never hits; for callers that opt out of caching.
pub struct NullCache;

impl EntityCache for NullCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
    fn put(&self, _key: &str, _value: String) {}
    fn invalidate(&self, _key: &str) {}
}
