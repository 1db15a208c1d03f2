//! MySQL engine over the synchronous `mysql` client.
//!
//! `SET SESSION max_execution_time` bounds SELECT statements server-side;
//! the handle's wall-clock guard covers everything else.

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, Params, Row, Value as MyValue};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use sluice_core::config::DatabaseConfig;
use sluice_core::connstring;
use sluice_core::errors::EngineError;
use sluice_core::params::ParamValue;
use sluice_core::types::{EngineKind, IsolationLevel, QueryRequest, QueryResult};
use sluice_core::{DatabaseEngine, EngineConnection};

pub struct MysqlEngine;

impl DatabaseEngine for MysqlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn name(&self) -> &'static str {
        "mysql"
    }

    fn connect(
        &self,
        config: &DatabaseConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        let url = connstring::build_connection_string(EngineKind::Mysql, config);
        let opts = Opts::from_url(&url).map_err(|e| EngineError::Connect {
            message: e.to_string(),
        })?;
        let conn = Conn::new(opts).map_err(|e| EngineError::Connect {
            message: e.to_string(),
        })?;
        debug!(
            "{designator} connected: {}",
            connstring::mask_connection_string(&url)
        );
        Ok(Box::new(MysqlConnection { conn }))
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        connection_string.starts_with("mysql://")
    }
}

pub struct MysqlConnection {
    conn: Conn,
}

fn exec_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Execute {
        message: e.to_string(),
    }
}

fn param_to_mysql(value: &ParamValue) -> MyValue {
    match value {
        ParamValue::Integer(v) => MyValue::Int(*v),
        ParamValue::Boolean(v) => MyValue::Int(i64::from(*v)),
        ParamValue::Float(v) => MyValue::Double(*v),
        other => MyValue::Bytes(other.as_text().into_bytes()),
    }
}

fn cell_to_json(value: &MyValue) -> Value {
    match value {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::from(*i),
        MyValue::UInt(u) => Value::from(*u),
        MyValue::Float(f) => Value::from(f64::from(*f)),
        MyValue::Double(d) => Value::from(*d),
        MyValue::Bytes(b) => Value::from(String::from_utf8_lossy(b).into_owned()),
        MyValue::Date(y, mo, d, h, mi, s, _) => {
            Value::from(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
        }
        MyValue::Time(neg, days, h, mi, s, _) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u32::from(*h) + *days * 24;
            Value::from(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
        }
    }
}

impl EngineConnection for MysqlConnection {
    fn engine(&self) -> EngineKind {
        EngineKind::Mysql
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
        params: &[ParamValue],
    ) -> Result<QueryResult, EngineError> {
        let timeout_ms = u64::from(request.timeout_seconds.max(1)) * 1000;
        if let Err(e) = self
            .conn
            .query_drop(format!("SET SESSION max_execution_time = {timeout_ms}"))
        {
            warn!("failed to set max_execution_time: {e}");
        }

        let bound: Vec<MyValue> = params.iter().map(param_to_mysql).collect();
        let statement_params = if bound.is_empty() {
            Params::Empty
        } else {
            Params::Positional(bound)
        };

        let rows: Vec<Row> = self
            .conn
            .exec(request.sql_template.as_str(), statement_params)
            .map_err(exec_err)?;
        let affected = self.conn.affected_rows();

        if rows.is_empty() {
            return Ok(QueryResult::rows("[]".to_string(), 0, Vec::new(), affected));
        }

        let column_names: Vec<String> = rows[0]
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut object = Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let cell = row.as_ref(i).map(cell_to_json).unwrap_or(Value::Null);
                object.insert(name.clone(), cell);
            }
            out.push(Value::Object(object));
        }
        let row_count = out.len();
        let data_json = serde_json::to_string(&Value::Array(out)).map_err(exec_err)?;
        Ok(QueryResult::rows(data_json, row_count, column_names, affected))
    }

    fn health_check(&mut self) -> Result<(), EngineError> {
        self.conn.query_drop("SELECT 1").map_err(exec_err)
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.conn.reset().map_err(exec_err)
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<(), EngineError> {
        self.conn
            .query_drop(format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                level.as_sql()
            ))
            .map_err(exec_err)?;
        self.conn.query_drop("START TRANSACTION").map_err(exec_err)
    }

    fn commit_transaction(&mut self) -> Result<(), EngineError> {
        self.conn.query_drop("COMMIT").map_err(exec_err)
    }

    fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        self.conn.query_drop("ROLLBACK").map_err(exec_err)
    }

    fn prepare_statement(&mut self, name: &str, sql: &str) -> Result<(), EngineError> {
        let quoted = sql.replace('\\', "\\\\").replace('\'', "\\'");
        self.conn
            .query_drop(format!("PREPARE {name} FROM '{quoted}'"))
            .map_err(|e| EngineError::Prepare {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    fn unprepare_statement(&mut self, name: &str) -> Result<(), EngineError> {
        self.conn
            .query_drop(format!("DEALLOCATE PREPARE {name}"))
            .map_err(|e| EngineError::Prepare {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    fn escape_string(&self, input: &str) -> String {
        input.replace('\\', "\\\\").replace('\'', "''")
    }

    fn close(&mut self) {
        // Conn closes its socket on drop.
    }
}
