//! The query cache (QTC): integer references to SQL templates with
//! routing metadata, seeded by the bootstrap query.

use tracing::warn;

use sluice_core::types::QueueClass;
use sluice_core::FxHashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCacheEntry {
    pub query_ref: i64,
    pub sql_template: String,
    pub description: Option<String>,
    /// Routing hint for the worker class this query prefers.
    pub queue_type: QueueClass,
    pub timeout_seconds: u32,
}

/// Entries are immutable once added and the cache is rebuilt wholesale by
/// each bootstrap; between bootstraps it is read-only.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: FxHashMap<i64, QueryCacheEntry>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Duplicate `query_ref` insertion has no specified
    /// precedence; the existing entry is kept and the duplicate reported
    /// with `false` so callers can flag it.
    pub fn add_entry(&mut self, entry: QueryCacheEntry) -> bool {
        if self.entries.contains_key(&entry.query_ref) {
            warn!(
                "duplicate query_ref {} in query cache; keeping first entry",
                entry.query_ref
            );
            return false;
        }
        self.entries.insert(entry.query_ref, entry);
        true
    }

    pub fn lookup(&self, query_ref: i64) -> Option<&QueryCacheEntry> {
        self.entries.get(&query_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
