//! Per-connection prepared-statement cache.
//!
//! Bounded LRU keyed by statement name. The cache only tracks bookkeeping;
//! the caller deallocates an evicted statement from the live session using
//! the entry this module hands back.

use std::num::NonZeroUsize;
use std::time::SystemTime;

use lru::LruCache;

/// Metadata for one statement prepared in the live session.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub sql_template: String,
    pub created_at: SystemTime,
    pub usage_count: u64,
}

impl PreparedStatement {
    pub fn new(name: impl Into<String>, sql_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_template: sql_template.into(),
            created_at: SystemTime::now(),
            usage_count: 0,
        }
    }
}

/// LRU cache of prepared statements. Count never exceeds capacity; an
/// insertion at capacity evicts the least recently used entry and returns
/// it so the owner can deallocate it server-side.
pub struct PreparedStatementCache {
    entries: LruCache<String, PreparedStatement>,
}

impl PreparedStatementCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Touch an entry, bumping its recency and usage count.
    pub fn touch(&mut self, name: &str) -> Option<&PreparedStatement> {
        let entry = self.entries.get_mut(name)?;
        entry.usage_count += 1;
        Some(entry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    /// Insert a statement. Returns the evicted least-recently-used entry
    /// when the cache was full; the caller must deallocate it from the
    /// live session. Re-inserting an existing name refreshes it without
    /// eviction.
    pub fn insert(&mut self, statement: PreparedStatement) -> Option<PreparedStatement> {
        let name = statement.name.clone();
        match self.entries.push(name.clone(), statement) {
            Some((evicted_name, evicted)) if evicted_name != name => Some(evicted),
            _ => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<PreparedStatement> {
        self.entries.pop(name)
    }

    /// Drain everything, LRU first. Used at disconnect so each statement
    /// can be deallocated from the session before the connection closes.
    pub fn drain(&mut self) -> Vec<PreparedStatement> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some((_, stmt)) = self.entries.pop_lru() {
            out.push(stmt);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_targets_least_recently_used() {
        let mut cache = PreparedStatementCache::new(2);
        assert!(cache.insert(PreparedStatement::new("a", "SELECT 1")).is_none());
        assert!(cache.insert(PreparedStatement::new("b", "SELECT 2")).is_none());

        // Touch "a" so "b" becomes the LRU entry.
        cache.touch("a").unwrap();

        let evicted = cache.insert(PreparedStatement::new("c", "SELECT 3")).unwrap();
        assert_eq!(evicted.name, "b");
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let mut cache = PreparedStatementCache::new(3);
        for i in 0..20 {
            cache.insert(PreparedStatement::new(format!("s{i}"), "SELECT 1"));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn reinsert_same_name_does_not_evict() {
        let mut cache = PreparedStatementCache::new(2);
        cache.insert(PreparedStatement::new("a", "SELECT 1"));
        cache.insert(PreparedStatement::new("b", "SELECT 2"));
        assert!(cache.insert(PreparedStatement::new("a", "SELECT 1b")).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn touch_tracks_usage() {
        let mut cache = PreparedStatementCache::new(4);
        cache.insert(PreparedStatement::new("a", "SELECT 1"));
        cache.touch("a");
        cache.touch("a");
        assert_eq!(cache.touch("a").unwrap().usage_count, 3);
        assert!(cache.touch("missing").is_none());
    }

    #[test]
    fn drain_empties_cache() {
        let mut cache = PreparedStatementCache::new(4);
        cache.insert(PreparedStatement::new("a", "SELECT 1"));
        cache.insert(PreparedStatement::new("b", "SELECT 2"));
        let drained = cache.drain();
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
    }
}
