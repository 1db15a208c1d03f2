//! PostgreSQL engine over the synchronous `postgres` client.
//!
//! `SET statement_timeout` runs before every execution (server-side, best
//! effort); the handle's wall-clock guard covers client-side hangs.

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use sluice_core::config::DatabaseConfig;
use sluice_core::connstring;
use sluice_core::errors::EngineError;
use sluice_core::params::ParamValue;
use sluice_core::types::{EngineKind, IsolationLevel, QueryRequest, QueryResult};
use sluice_core::{DatabaseEngine, EngineConnection};

pub struct PostgresEngine;

impl DatabaseEngine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn connect(
        &self,
        config: &DatabaseConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        let url = connstring::build_connection_string(EngineKind::Postgres, config);
        let client = Client::connect(&url, NoTls).map_err(|e| EngineError::Connect {
            message: e.to_string(),
        })?;
        debug!(
            "{designator} connected: {}",
            connstring::mask_connection_string(&url)
        );
        Ok(Box::new(PostgresConnection { client }))
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        connection_string.starts_with("postgresql://")
    }
}

pub struct PostgresConnection {
    client: Client,
}

fn exec_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Execute {
        message: e.to_string(),
    }
}

/// Owned bind values so trait-object references stay alive for the call.
enum PgBind {
    Int(i64),
    Bool(bool),
    Float(f64),
    Text(String),
}

impl PgBind {
    fn from_param(value: &ParamValue) -> PgBind {
        match value {
            ParamValue::Integer(v) => PgBind::Int(*v),
            ParamValue::Boolean(v) => PgBind::Bool(*v),
            ParamValue::Float(v) => PgBind::Float(*v),
            other => PgBind::Text(other.as_text()),
        }
    }

    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            PgBind::Int(v) => v,
            PgBind::Bool(v) => v,
            PgBind::Float(v) => v,
            PgBind::Text(v) => v,
        }
    }
}

fn cell_to_json(row: &Row, index: usize) -> Value {
    let ty = row.columns()[index].type_();
    let cell = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    } else {
        row.try_get::<_, Option<String>>(index)
            .ok()
            .flatten()
            .map(Value::from)
    };
    cell.unwrap_or(Value::Null)
}

impl EngineConnection for PostgresConnection {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
        params: &[ParamValue],
    ) -> Result<QueryResult, EngineError> {
        let timeout_ms = u64::from(request.timeout_seconds.max(1)) * 1000;
        if let Err(e) = self
            .client
            .batch_execute(&format!("SET statement_timeout = {timeout_ms}"))
        {
            warn!("failed to set statement_timeout: {e}");
        }

        let binds: Vec<PgBind> = params.iter().map(PgBind::from_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = binds.iter().map(PgBind::as_sql).collect();

        let stmt = self
            .client
            .prepare(&request.sql_template)
            .map_err(exec_err)?;

        if stmt.columns().is_empty() {
            let affected = self.client.execute(&stmt, &refs).map_err(exec_err)?;
            return Ok(QueryResult::rows("[]".to_string(), 0, Vec::new(), affected));
        }

        let column_names: Vec<String> =
            stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = self.client.query(&stmt, &refs).map_err(exec_err)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut object = Map::new();
            for (i, name) in column_names.iter().enumerate() {
                object.insert(name.clone(), cell_to_json(row, i));
            }
            out.push(Value::Object(object));
        }
        let row_count = out.len();
        let data_json = serde_json::to_string(&Value::Array(out)).map_err(exec_err)?;
        Ok(QueryResult::rows(data_json, row_count, column_names, 0))
    }

    fn health_check(&mut self) -> Result<(), EngineError> {
        self.client
            .query_one("SELECT 1", &[])
            .map(|_| ())
            .map_err(exec_err)
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        // Abort any open transaction; harmless outside one.
        self.client
            .batch_execute("ABORT; DISCARD ALL")
            .map_err(exec_err)
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<(), EngineError> {
        self.client
            .batch_execute(&format!("BEGIN ISOLATION LEVEL {}", level.as_sql()))
            .map_err(exec_err)
    }

    fn commit_transaction(&mut self) -> Result<(), EngineError> {
        self.client.batch_execute("COMMIT").map_err(exec_err)
    }

    fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        self.client.batch_execute("ROLLBACK").map_err(exec_err)
    }

    fn prepare_statement(&mut self, name: &str, sql: &str) -> Result<(), EngineError> {
        self.client
            .batch_execute(&format!("PREPARE {name} AS {sql}"))
            .map_err(|e| EngineError::Prepare {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    fn unprepare_statement(&mut self, name: &str) -> Result<(), EngineError> {
        self.client
            .batch_execute(&format!("DEALLOCATE {name}"))
            .map_err(|e| EngineError::Prepare {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    fn escape_string(&self, input: &str) -> String {
        input.replace('\'', "''")
    }

    fn close(&mut self) {
        // Client closes its socket on drop.
    }
}
