//! Bootstrap result processing.
//!
//! The lead queue's bootstrap query returns rows that are either query
//! cache seed rows or migration-tracking marker rows. Marker rows carry a
//! reserved `query_type`; their `query_ref` values aggregate via max into
//! the migration high-water marks.

use serde_json::Value;

use sluice_core::types::QueueClass;

use crate::qtc::{QueryCache, QueryCacheEntry};

/// `query_type` marking a migration as available to load.
pub const MIGRATION_AVAILABLE_MARKER: i64 = 1000;
/// `query_type` marking a migration as applied.
pub const MIGRATION_APPLIED_MARKER: i64 = 1003;

/// What one bootstrap pass learned.
#[derive(Debug, Default)]
pub struct BootstrapOutcome {
    pub cache: QueryCache,
    pub latest_available_migration: i64,
    pub latest_applied_migration: i64,
    pub empty_database: bool,
}

/// Classify bootstrap rows into query-cache seeds and migration marks.
/// An empty result set means an empty database: both marks stay at zero.
pub fn process_bootstrap_rows(rows: &[Value]) -> BootstrapOutcome {
    let mut outcome = BootstrapOutcome::default();
    if rows.is_empty() {
        outcome.empty_database = true;
        return outcome;
    }

    for row in rows {
        let query_type = row.get("query_type").and_then(Value::as_i64);
        let query_ref = row.get("query_ref").and_then(Value::as_i64);

        match query_type {
            Some(MIGRATION_AVAILABLE_MARKER) => {
                if let Some(r) = query_ref {
                    outcome.latest_available_migration =
                        outcome.latest_available_migration.max(r);
                }
            }
            Some(MIGRATION_APPLIED_MARKER) => {
                if let Some(r) = query_ref {
                    outcome.latest_applied_migration = outcome.latest_applied_migration.max(r);
                }
            }
            _ => {
                let Some(query_ref) = query_ref else { continue };
                let Some(sql) = row.get("query").and_then(Value::as_str) else {
                    continue;
                };
                outcome.cache.add_entry(QueryCacheEntry {
                    query_ref,
                    sql_template: sql.to_string(),
                    description: row
                        .get("query_name")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    queue_type: QueueClass::from_hint(
                        row.get("query_queue").and_then(Value::as_str),
                    ),
                    timeout_seconds: row
                        .get("query_timeout")
                        .and_then(Value::as_u64)
                        .map(|t| t as u32)
                        .unwrap_or(30),
                });
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn available_marker_rows_aggregate_via_max() {
        let rows = vec![
            json!({"query_type": 1000, "query_ref": 5}),
            json!({"query_type": 1000, "query_ref": 3}),
        ];
        let outcome = process_bootstrap_rows(&rows);
        assert_eq!(outcome.latest_available_migration, 5);
        assert_eq!(outcome.latest_applied_migration, 0);
        assert!(!outcome.empty_database);
        assert!(outcome.cache.is_empty());
    }

    #[test]
    fn applied_marker_rows_aggregate_separately() {
        let rows = vec![
            json!({"query_type": 1000, "query_ref": 7}),
            json!({"query_type": 1003, "query_ref": 6}),
            json!({"query_type": 1003, "query_ref": 4}),
        ];
        let outcome = process_bootstrap_rows(&rows);
        assert_eq!(outcome.latest_available_migration, 7);
        assert_eq!(outcome.latest_applied_migration, 6);
    }

    #[test]
    fn empty_result_means_empty_database() {
        let outcome = process_bootstrap_rows(&[]);
        assert!(outcome.empty_database);
        assert_eq!(outcome.latest_available_migration, 0);
        assert_eq!(outcome.latest_applied_migration, 0);
    }

    #[test]
    fn cache_rows_seed_the_qtc() {
        let rows = vec![
            json!({
                "query_ref": 1,
                "query": "SELECT * FROM accounts WHERE login_id = :loginId",
                "query_name": "Get Account by Login ID",
                "query_queue": "fast",
                "query_timeout": 10
            }),
            json!({"query_ref": 2, "query": "SELECT 1"}),
            json!({"query_type": 1000, "query_ref": 1001}),
        ];
        let outcome = process_bootstrap_rows(&rows);
        assert_eq!(outcome.cache.len(), 2);
        let entry = outcome.cache.lookup(1).unwrap();
        assert_eq!(entry.queue_type, QueueClass::Fast);
        assert_eq!(entry.timeout_seconds, 10);
        assert_eq!(entry.description.as_deref(), Some("Get Account by Login ID"));
        let default_entry = outcome.cache.lookup(2).unwrap();
        assert_eq!(default_entry.queue_type, QueueClass::Medium);
        assert_eq!(default_entry.timeout_seconds, 30);
        assert_eq!(outcome.latest_available_migration, 1001);
    }

    #[test]
    fn rows_missing_sql_or_ref_are_skipped() {
        let rows = vec![
            json!({"query_ref": 9}),
            json!({"query": "SELECT 1"}),
            json!({"unrelated": true}),
        ];
        let outcome = process_bootstrap_rows(&rows);
        assert!(outcome.cache.is_empty());
        assert!(!outcome.empty_database);
    }
}
