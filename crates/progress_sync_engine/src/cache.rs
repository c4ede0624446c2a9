//! Per-user cache with time-based expiry.

use parking_lot::RwLock;
use progress_sync_protocol::UserId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// A keyed cache for per-user payloads such as dashboard summaries.
///
/// Entries expire `ttl` after insertion. Expired entries are evicted on
/// access or by [`ProgressCache::purge_expired`]. The cache is owned by the
/// caller of the sync engine, typically invalidated after a cycle that
/// pulled new progress for the user.
#[derive(Debug)]
pub struct ProgressCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<UserId, CacheEntry<V>>>,
}

impl<V: Clone> ProgressCache<V> {
    /// Creates an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the time-to-live of entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or replaces the value for a user.
    pub fn insert(&self, user_id: UserId, value: V) {
        self.entries.write().insert(
            user_id,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Returns the user's value if it has not expired.
    pub fn get(&self, user_id: &UserId) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(user_id) {
                Some(entry) if !self.is_expired(entry) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write();
        self.fresh_or_evict(&mut entries, user_id)
    }

    /// Drops the user's value.
    pub fn invalidate(&self, user_id: &UserId) -> bool {
        self.entries.write().remove(user_id).is_some()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - entries.len()
    }

    /// Returns the number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Expiry is checked again here: the entry may have been replaced
    /// between the read and write locks.
    fn fresh_or_evict(
        &self,
        entries: &mut HashMap<UserId, CacheEntry<V>>,
        user_id: &UserId,
    ) -> Option<V> {
        match entries.get(user_id) {
            Some(entry) if !self.is_expired(entry) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(user_id);
                None
            }
            None => None,
        }
    }

    fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }
}
