//! SQLite engine over rusqlite (bundled).
//!
//! The connection string is a filesystem path; `sqlite://` prefixes are
//! stripped and `:memory:` (or an empty path) opens an in-memory database.

use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::debug;

use sluice_core::config::DatabaseConfig;
use sluice_core::errors::EngineError;
use sluice_core::params::ParamValue;
use sluice_core::types::{EngineKind, IsolationLevel, QueryRequest, QueryResult};
use sluice_core::{DatabaseEngine, EngineConnection};

pub struct SqliteEngine;

impl DatabaseEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(
        &self,
        config: &DatabaseConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        let raw = config
            .connection_string
            .as_deref()
            .or(config.database.as_deref())
            .unwrap_or(":memory:");
        let path = raw.strip_prefix("sqlite://").unwrap_or(raw);

        let conn = if path.is_empty() || path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| EngineError::Connect {
            message: e.to_string(),
        })?;

        debug!("{designator} opened sqlite database '{path}'");
        Ok(Box::new(SqliteConnection { conn }))
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        !connection_string.contains("://") || connection_string.starts_with("sqlite://")
    }
}

pub struct SqliteConnection {
    conn: Connection,
}

fn exec_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Execute {
        message: e.to_string(),
    }
}

fn param_to_sqlite(value: &ParamValue) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        ParamValue::Integer(v) => Sql::Integer(*v),
        ParamValue::Boolean(v) => Sql::Integer(i64::from(*v)),
        ParamValue::Float(v) => Sql::Real(*v),
        ParamValue::String(v)
        | ParamValue::Text(v)
        | ParamValue::Date(v)
        | ParamValue::Time(v)
        | ParamValue::DateTime(v)
        | ParamValue::Timestamp(v) => Sql::Text(v.clone()),
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(String::from_utf8_lossy(b).into_owned()),
    }
}

impl EngineConnection for SqliteConnection {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
        params: &[ParamValue],
    ) -> Result<QueryResult, EngineError> {
        // SQLite's timeout is lock-wait only; the wall-clock guard in the
        // handle covers long-running statements.
        self.conn
            .busy_timeout(Duration::from_secs(u64::from(request.timeout_seconds.max(1))))
            .map_err(exec_err)?;

        let mut stmt = self.conn.prepare(&request.sql_template).map_err(exec_err)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|n| n.to_string()).collect();
        let bound: Vec<rusqlite::types::Value> = params.iter().map(param_to_sqlite).collect();

        if column_names.is_empty() {
            let affected = stmt
                .execute(rusqlite::params_from_iter(bound.iter()))
                .map_err(exec_err)?;
            return Ok(QueryResult::rows(
                "[]".to_string(),
                0,
                Vec::new(),
                affected as u64,
            ));
        }

        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound.iter()))
            .map_err(exec_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(exec_err)? {
            let mut object = Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let cell = row.get_ref(i).map_err(exec_err)?;
                object.insert(name.clone(), value_ref_to_json(cell));
            }
            out.push(Value::Object(object));
        }
        let row_count = out.len();
        let data_json = serde_json::to_string(&Value::Array(out)).map_err(exec_err)?;
        Ok(QueryResult::rows(data_json, row_count, column_names, 0))
    }

    fn health_check(&mut self) -> Result<(), EngineError> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(exec_err)
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK").map_err(exec_err)?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self, _level: IsolationLevel) -> Result<(), EngineError> {
        // SQLite has no per-transaction isolation clause; IMMEDIATE takes
        // the write lock up front so later statements cannot deadlock.
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(exec_err)
    }

    fn commit_transaction(&mut self) -> Result<(), EngineError> {
        self.conn.execute_batch("COMMIT").map_err(exec_err)
    }

    fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        self.conn.execute_batch("ROLLBACK").map_err(exec_err)
    }

    fn prepare_statement(&mut self, name: &str, sql: &str) -> Result<(), EngineError> {
        // SQLite has no named server-side prepares; compiling the SQL once
        // validates it and warms rusqlite's statement cache.
        self.conn
            .prepare_cached(sql)
            .map(|_| ())
            .map_err(|e| EngineError::Prepare {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    fn unprepare_statement(&mut self, _name: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn escape_string(&self, input: &str) -> String {
        input.replace('\'', "''")
    }

    fn close(&mut self) {
        // rusqlite closes on drop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SqliteConnection {
        SqliteConnection {
            conn: Connection::open_in_memory().unwrap(),
        }
    }

    #[test]
    fn engine_connects_in_memory() {
        let config = DatabaseConfig {
            name: "test".to_string(),
            engine: Some("sqlite".to_string()),
            database: Some(":memory:".to_string()),
            ..Default::default()
        };
        let mut conn = SqliteEngine.connect(&config, "DQM-test-00").unwrap();
        conn.health_check().unwrap();
    }

    #[test]
    fn select_serializes_rows_to_json_objects() {
        let mut c = open();
        c.conn
            .execute_batch(
                "CREATE TABLE t (id INTEGER, name TEXT);
                 INSERT INTO t VALUES (1, 'a'), (2, 'b');",
            )
            .unwrap();

        let request = QueryRequest::new("q1", "SELECT id, name FROM t ORDER BY id");
        let result = c.execute(&request, &[]).unwrap();
        assert!(result.success);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.column_names, vec!["id", "name"]);
        let rows = result.rows_as_json();
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[1]["name"], "b");
    }

    #[test]
    fn positional_binds_apply_in_order() {
        let mut c = open();
        c.conn
            .execute_batch("CREATE TABLE t (id INTEGER, name TEXT)")
            .unwrap();
        let request = QueryRequest::new("q1", "INSERT INTO t VALUES (?, ?)");
        let result = c
            .execute(
                &request,
                &[ParamValue::Integer(7), ParamValue::String("x".into())],
            )
            .unwrap();
        assert_eq!(result.affected_rows, 1);

        let check = QueryRequest::new("q2", "SELECT name FROM t WHERE id = ?");
        let result = c.execute(&check, &[ParamValue::Integer(7)]).unwrap();
        assert_eq!(result.rows_as_json()[0]["name"], "x");
    }

    #[test]
    fn transactions_commit_and_rollback() {
        let mut c = open();
        c.conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();

        c.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
        c.execute(&QueryRequest::new("q", "INSERT INTO t VALUES (1)"), &[])
            .unwrap();
        c.rollback_transaction().unwrap();
        let count = c
            .execute(&QueryRequest::new("q", "SELECT COUNT(*) AS n FROM t"), &[])
            .unwrap();
        assert_eq!(count.rows_as_json()[0]["n"], 0);

        c.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
        c.execute(&QueryRequest::new("q", "INSERT INTO t VALUES (2)"), &[])
            .unwrap();
        c.commit_transaction().unwrap();
        let count = c
            .execute(&QueryRequest::new("q", "SELECT COUNT(*) AS n FROM t"), &[])
            .unwrap();
        assert_eq!(count.rows_as_json()[0]["n"], 1);
    }

    #[test]
    fn health_check_round_trips() {
        let mut c = open();
        c.health_check().unwrap();
    }

    #[test]
    fn escape_doubles_quotes() {
        let c = open();
        assert_eq!(c.escape_string("o'brien"), "o''brien");
    }
}
