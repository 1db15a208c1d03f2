//! Shared types: engine kinds, queue classes, query requests and results.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Default statement timeout applied when a request does not carry one.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u32 = 30;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    Mysql,
    Sqlite,
    Db2,
}

impl EngineKind {
    /// All engines, in the order operational tooling reports them.
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Postgres,
        EngineKind::Sqlite,
        EngineKind::Mysql,
        EngineKind::Db2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgresql",
            EngineKind::Mysql => "mysql",
            EngineKind::Sqlite => "sqlite",
            EngineKind::Db2 => "db2",
        }
    }

    /// Human-facing name used in stats and the supported-engines listing.
    pub fn display_name(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "PostgreSQL",
            EngineKind::Mysql => "MySQL",
            EngineKind::Sqlite => "SQLite",
            EngineKind::Db2 => "DB2",
        }
    }

    pub fn from_name(name: &str) -> Option<EngineKind> {
        match name.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Some(EngineKind::Postgres),
            "mysql" => Some(EngineKind::Mysql),
            "sqlite" => Some(EngineKind::Sqlite),
            "db2" => Some(EngineKind::Db2),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::Postgres => 5432,
            EngineKind::Mysql => 3306,
            EngineKind::Sqlite => 0,
            EngineKind::Db2 => 50000,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker queue classes. Routing falls back to `Medium` when no hint matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueClass {
    Slow,
    Medium,
    Fast,
    Cache,
}

impl QueueClass {
    pub const ALL: [QueueClass; 4] = [
        QueueClass::Slow,
        QueueClass::Medium,
        QueueClass::Fast,
        QueueClass::Cache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Slow => "slow",
            QueueClass::Medium => "medium",
            QueueClass::Fast => "fast",
            QueueClass::Cache => "cache",
        }
    }

    /// Parse a routing hint. Unknown or absent hints map to `Medium`.
    pub fn from_hint(hint: Option<&str>) -> QueueClass {
        match hint {
            Some("slow") => QueueClass::Slow,
            Some("medium") => QueueClass::Medium,
            Some("fast") => QueueClass::Fast,
            Some("cache") => QueueClass::Cache,
            _ => QueueClass::Medium,
        }
    }
}

impl std::fmt::Display for QueueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// The SQL phrase engines append to BEGIN/SET TRANSACTION.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::ReadCommitted
    }
}

/// A unit of SQL work submitted to a queue.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query_id: String,
    pub sql_template: String,
    /// Typed-JSON parameter payload (see `params::parse_typed_parameters`).
    pub parameters_json: String,
    pub timeout_seconds: u32,
    pub isolation_level: IsolationLevel,
    pub prefer_prepared: bool,
    pub prepared_name: Option<String>,
}

impl QueryRequest {
    pub fn new(query_id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            sql_template: sql.into(),
            parameters_json: "{}".to_string(),
            timeout_seconds: DEFAULT_QUERY_TIMEOUT_SECS,
            isolation_level: IsolationLevel::default(),
            prefer_prepared: false,
            prepared_name: None,
        }
    }

    pub fn with_parameters(mut self, parameters_json: impl Into<String>) -> Self {
        self.parameters_json = parameters_json.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// The outcome of one executed query. `data_json` is an array of row
/// objects keyed by column name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub data_json: String,
    pub row_count: usize,
    pub column_count: usize,
    pub column_names: Vec<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub affected_rows: u64,
}

impl QueryResult {
    pub fn rows(
        data_json: String,
        row_count: usize,
        column_names: Vec<String>,
        affected_rows: u64,
    ) -> Self {
        Self {
            success: true,
            data_json,
            row_count,
            column_count: column_names.len(),
            column_names,
            error_message: None,
            execution_time_ms: 0,
            affected_rows,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data_json: "[]".to_string(),
            row_count: 0,
            column_count: 0,
            column_names: Vec::new(),
            error_message: Some(message.into()),
            execution_time_ms: 0,
            affected_rows: 0,
        }
    }

    pub fn timed_out(seconds: u32) -> Self {
        Self::failure(format!("query exceeded {seconds}s timeout"))
    }

    /// Parse `data_json` back into row objects. Malformed payloads yield an
    /// empty row set rather than an error.
    pub fn rows_as_json(&self) -> Vec<serde_json::Value> {
        serde_json::from_str::<serde_json::Value>(&self.data_json)
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
    }
}

/// A live transaction on one connection. At most one per connection;
/// `active` drops to false on commit or rollback.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: String,
    pub isolation_level: IsolationLevel,
    pub started_at: SystemTime,
    pub active: bool,
}

impl Transaction {
    pub fn begin(id: impl Into<String>, isolation_level: IsolationLevel) -> Self {
        Self {
            id: id.into(),
            isolation_level,
            started_at: SystemTime::now(),
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(EngineKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EngineKind::from_name("postgres"), Some(EngineKind::Postgres));
        assert_eq!(EngineKind::from_name("oracle"), None);
    }

    #[test]
    fn queue_class_hint_defaults_to_medium() {
        assert_eq!(QueueClass::from_hint(Some("fast")), QueueClass::Fast);
        assert_eq!(QueueClass::from_hint(Some("bogus")), QueueClass::Medium);
        assert_eq!(QueueClass::from_hint(None), QueueClass::Medium);
    }

    #[test]
    fn result_failure_carries_message() {
        let r = QueryResult::failure("boom");
        assert!(!r.success);
        assert_eq!(r.error_message.as_deref(), Some("boom"));
        assert!(r.rows_as_json().is_empty());
    }
}
