//! Concurrent map whose entries expire a fixed time after insertion.

use std::fmt;
use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Expired entries are invisible to readers and dropped lazily on access or
/// in bulk by [`TtlMap::purge_expired`].
pub struct TtlMap<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V> fmt::Debug for TtlMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlMap")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let ttl = self.ttl;
        let live = self
            .entries
            .get(key)
            .map(|entry| (now.saturating_duration_since(entry.inserted_at) < ttl, entry.value.clone()));

        match live {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                self.entries
                    .remove_if(key, |_, entry| now.saturating_duration_since(entry.inserted_at) >= ttl);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: K, value: V, now: Instant) {
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Includes expired entries not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let map = TtlMap::new(Duration::from_secs(60));
        let start = Instant::now();
        map.insert_at(1, "a".to_string(), start);

        assert_eq!(map.get_at(&1, start + Duration::from_secs(59)), Some("a".to_string()));
        assert_eq!(map.get_at(&1, start + Duration::from_secs(60)), None);
        // lazily dropped on the expired read
        assert!(map.is_empty());
    }

    #[test]
    fn reinsert_restarts_the_clock() {
        let map = TtlMap::new(Duration::from_secs(10));
        let start = Instant::now();
        map.insert_at("k", 1, start);
        map.insert_at("k", 2, start + Duration::from_secs(8));
        assert_eq!(map.get_at(&"k", start + Duration::from_secs(15)), Some(2));
    }

    #[test]
    fn debug_shows_size_not_values() {
        let map = TtlMap::new(Duration::from_secs(5));
        map.insert(7_i64, "secret-token".to_string());
        let rendered = format!("{map:?}");
        assert!(rendered.contains("entries: 1"), "{rendered}");
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn purge_keeps_live_entries() {
        let map = TtlMap::new(Duration::from_millis(20));
        map.insert_at("old", 1, Instant::now() - Duration::from_secs(1));
        map.insert("fresh", 2);
        assert_eq!(map.purge_expired(), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"fresh"), Some(2));
    }
}
