use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory map whose entries expire after a fixed TTL.
///
/// When full, expired entries are swept on insert; if it is still full the
/// new entry is dropped.
pub struct TtlCache<V> {
    entries: RwLock<FxHashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            ttl,
            max_entries,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    pub fn insert(&self, key: String, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_entries {
                return;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_fresh_entry() {
        let cache = TtlCache::new(Duration::from_secs(60), 8);
        cache.insert("k".to_string(), 7);
        assert_eq!(cache.get("k"), Some(7));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_expired_entry_is_not_returned() {
        let cache = TtlCache::new(Duration::ZERO, 8);
        cache.insert("k".to_string(), 7);
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_full_cache_sweeps_expired_then_drops() {
        let expired = TtlCache::new(Duration::ZERO, 2);
        expired.insert("a".to_string(), 1);
        expired.insert("b".to_string(), 2);
        expired.insert("c".to_string(), 3);
        assert_eq!(expired.len(), 1);

        let live = TtlCache::new(Duration::from_secs(60), 2);
        live.insert("a".to_string(), 1);
        live.insert("b".to_string(), 2);
        live.insert("c".to_string(), 3);
        assert_eq!(live.len(), 2);
        assert_eq!(live.get("c"), None);

        live.insert("a".to_string(), 10);
        assert_eq!(live.get("a"), Some(10));
    }
}
