//! Short-lived concurrent cache for provider readings.
//!
//! Entries are fresh for one TTL and usable as a fallback ("stale") for a
//! second one. Anything older is dead and removed on the next prune.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Miss,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Copy,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn lookup(&self, key: &K) -> Lookup<V> {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        let (stored_at, value) = *entry.value();
        let age = stored_at.elapsed();
        if age <= self.ttl {
            Lookup::Fresh(value)
        } else if age <= self.ttl.saturating_mul(2) {
            Lookup::Stale(value)
        } else {
            Lookup::Miss
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove dead entries, then the oldest live ones over capacity.
    pub fn prune(&self) {
        let dead_after = self.ttl.saturating_mul(2);
        self.entries
            .retain(|_, (stored_at, _)| stored_at.elapsed() <= dead_after);

        let excess = self.entries.len().saturating_sub(self.max_entries);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().0))
            .collect();
        by_age.sort_by_key(|(_, stored_at)| *stored_at);
        for (key, _) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_age_from_fresh_to_stale_to_miss() {
        let cache = TtlCache::new(Duration::from_millis(20), 10);
        cache.insert("a", 1);
        assert_eq!(cache.lookup(&"a"), Lookup::Fresh(1));
        assert_eq!(cache.lookup(&"b"), Lookup::Miss);

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.lookup(&"a"), Lookup::Stale(1));

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.lookup(&"a"), Lookup::Miss);
        cache.prune();
        assert!(cache.is_empty());
    }

    #[test]
    fn prune_keeps_newest_within_capacity() {
        let cache = TtlCache::new(Duration::from_secs(60), 3);
        for i in 0..5u64 {
            cache.insert(i, i);
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.prune();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.lookup(&0), Lookup::Miss);
        assert_eq!(cache.lookup(&1), Lookup::Miss);
        assert_eq!(cache.lookup(&4), Lookup::Fresh(4));
    }
}
