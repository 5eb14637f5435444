//! Synchronization primitives for the orchestration core.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Max idle age before a lock entry is considered stale (2 hours).
pub const DEFAULT_MAX_IDLE_AGE: Duration = Duration::from_secs(7200);

/// Internal storage type for keyed locks: maps key to (lock, last_access_time).
type LockStorage = DashMap<String, (Arc<Mutex<()>>, Instant)>;

/// Per-key async mutex with stale entry cleanup.
///
/// Different keys can be locked concurrently while operations on the same
/// key are serialized. Tracks last-access time for each key so a periodic
/// sweep can drop entries for conversations that went quiet.
#[derive(Clone)]
pub struct KeyedLocks {
    locks: Arc<LockStorage>,
}

impl KeyedLocks {
    /// Create a new empty lock collection.
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Get or create a lock for the given key.
    ///
    /// Updates the last-access timestamp on each call for cleanup tracking.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        let now = Instant::now();
        self.locks
            .entry(key.to_string())
            .and_modify(|(_, last_access)| *last_access = now)
            .or_insert_with(|| (Arc::new(Mutex::new(())), now))
            .0
            .clone()
    }

    /// Remove stale lock entries that haven't been accessed recently.
    ///
    /// Only removes entries where the lock hasn't been accessed within
    /// `max_age` and nothing else holds a reference to it (strong_count
    /// == 1, so nobody can be waiting on it).
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale_keys: Vec<_> = self
            .locks
            .iter()
            .filter(|entry| {
                let (lock, last_access) = entry.value();
                Arc::strong_count(lock) == 1 && now.duration_since(*last_access) > max_age
            })
            .map(|entry| entry.key().clone())
            .collect();

        let count = stale_keys.len();
        for key in stale_keys {
            self.locks.remove(&key);
        }
        count
    }

    /// Return the number of lock entries currently held.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Return true if there are no lock entries.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}
