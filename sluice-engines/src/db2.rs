//! DB2 engine over the CLI/ODBC driver, resolved at runtime.
//!
//! The native client library is loaded once per process with `libloading`
//! the first time a DB2 connection is requested; resolved symbols are
//! cached in a `OnceLock`. A missing or unloadable library surfaces as
//! `EngineError::Unavailable`, never a crash.

use std::ffi::c_void;
use std::sync::OnceLock;

use libloading::Library;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use sluice_core::config::DatabaseConfig;
use sluice_core::connstring;
use sluice_core::errors::EngineError;
use sluice_core::params::ParamValue;
use sluice_core::types::{EngineKind, IsolationLevel, QueryRequest, QueryResult};
use sluice_core::{DatabaseEngine, EngineConnection};

// CLI handle types and the constants this module uses.
type SqlHandle = *mut c_void;
type SqlReturn = i16;
type SqlLen = isize;

const SQL_HANDLE_ENV: i16 = 1;
const SQL_HANDLE_DBC: i16 = 2;
const SQL_HANDLE_STMT: i16 = 3;
const SQL_NULL_HANDLE: SqlHandle = std::ptr::null_mut();
const SQL_ATTR_ODBC_VERSION: i32 = 200;
const SQL_OV_ODBC3: i32 = 3;
const SQL_NTS: i32 = -3;
const SQL_SUCCESS: SqlReturn = 0;
const SQL_SUCCESS_WITH_INFO: SqlReturn = 1;
const SQL_NO_DATA: SqlReturn = 100;
const SQL_DRIVER_NOPROMPT: u16 = 0;
const SQL_C_CHAR: i16 = 1;
const SQL_NULL_DATA: SqlLen = -1;
const SQL_ATTR_QUERY_TIMEOUT: i32 = 0;
const SQL_ATTR_AUTOCOMMIT: i32 = 102;
const SQL_AUTOCOMMIT_OFF: usize = 0;
const SQL_AUTOCOMMIT_ON: usize = 1;
const SQL_COMMIT: i16 = 0;
const SQL_ROLLBACK: i16 = 1;

/// Candidate library names, tried in order.
const LIBRARY_NAMES: [&str; 3] = ["libdb2.so.1", "libdb2.so", "db2"];

fn ok(rc: SqlReturn) -> bool {
    rc == SQL_SUCCESS || rc == SQL_SUCCESS_WITH_INFO
}

/// Resolved CLI entry points. Function pointers are copied out of the
/// library, which stays alive alongside them for the process lifetime.
struct Db2Cli {
    _lib: Library,
    alloc_handle: unsafe extern "C" fn(i16, SqlHandle, *mut SqlHandle) -> SqlReturn,
    free_handle: unsafe extern "C" fn(i16, SqlHandle) -> SqlReturn,
    set_env_attr: unsafe extern "C" fn(SqlHandle, i32, *mut c_void, i32) -> SqlReturn,
    set_connect_attr: unsafe extern "C" fn(SqlHandle, i32, *mut c_void, i32) -> SqlReturn,
    set_stmt_attr: unsafe extern "C" fn(SqlHandle, i32, *mut c_void, i32) -> SqlReturn,
    driver_connect: unsafe extern "C" fn(
        SqlHandle,
        *mut c_void,
        *const u8,
        i16,
        *mut u8,
        i16,
        *mut i16,
        u16,
    ) -> SqlReturn,
    disconnect: unsafe extern "C" fn(SqlHandle) -> SqlReturn,
    exec_direct: unsafe extern "C" fn(SqlHandle, *const u8, i32) -> SqlReturn,
    num_result_cols: unsafe extern "C" fn(SqlHandle, *mut i16) -> SqlReturn,
    describe_col: unsafe extern "C" fn(
        SqlHandle,
        u16,
        *mut u8,
        i16,
        *mut i16,
        *mut i16,
        *mut usize,
        *mut i16,
        *mut i16,
    ) -> SqlReturn,
    fetch: unsafe extern "C" fn(SqlHandle) -> SqlReturn,
    get_data:
        unsafe extern "C" fn(SqlHandle, u16, i16, *mut c_void, SqlLen, *mut SqlLen) -> SqlReturn,
    row_count: unsafe extern "C" fn(SqlHandle, *mut SqlLen) -> SqlReturn,
    end_tran: unsafe extern "C" fn(i16, SqlHandle, i16) -> SqlReturn,
    get_diag_rec: unsafe extern "C" fn(
        i16,
        SqlHandle,
        i16,
        *mut u8,
        *mut i32,
        *mut u8,
        i16,
        *mut i16,
    ) -> SqlReturn,
}

static CLI: OnceLock<Result<Db2Cli, String>> = OnceLock::new();

fn load_cli() -> Result<Db2Cli, String> {
    let lib = LIBRARY_NAMES
        .iter()
        .find_map(|name| unsafe { Library::new(name).ok() })
        .ok_or_else(|| format!("DB2 CLI library not found (tried {LIBRARY_NAMES:?})"))?;

    macro_rules! sym {
        ($name:literal) => {
            unsafe {
                *lib.get($name)
                    .map_err(|e| format!("missing CLI symbol {:?}: {e}", $name))?
            }
        };
    }

    let cli = Db2Cli {
        alloc_handle: sym!(b"SQLAllocHandle"),
        free_handle: sym!(b"SQLFreeHandle"),
        set_env_attr: sym!(b"SQLSetEnvAttr"),
        set_connect_attr: sym!(b"SQLSetConnectAttr"),
        set_stmt_attr: sym!(b"SQLSetStmtAttr"),
        driver_connect: sym!(b"SQLDriverConnect"),
        disconnect: sym!(b"SQLDisconnect"),
        exec_direct: sym!(b"SQLExecDirect"),
        num_result_cols: sym!(b"SQLNumResultCols"),
        describe_col: sym!(b"SQLDescribeCol"),
        fetch: sym!(b"SQLFetch"),
        get_data: sym!(b"SQLGetData"),
        row_count: sym!(b"SQLRowCount"),
        end_tran: sym!(b"SQLEndTran"),
        get_diag_rec: sym!(b"SQLGetDiagRec"),
        _lib: lib,
    };
    Ok(cli)
}

fn cli() -> Result<&'static Db2Cli, EngineError> {
    match CLI.get_or_init(load_cli) {
        Ok(cli) => Ok(cli),
        Err(reason) => Err(EngineError::Unavailable {
            engine: "db2".to_string(),
            reason: reason.clone(),
        }),
    }
}

pub struct Db2Engine;

impl DatabaseEngine for Db2Engine {
    fn kind(&self) -> EngineKind {
        EngineKind::Db2
    }

    fn name(&self) -> &'static str {
        "db2"
    }

    fn connect(
        &self,
        config: &DatabaseConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        let cli = cli()?;
        let dsn = connstring::build_connection_string(EngineKind::Db2, config);

        unsafe {
            let mut env: SqlHandle = SQL_NULL_HANDLE;
            if !ok((cli.alloc_handle)(SQL_HANDLE_ENV, SQL_NULL_HANDLE, &mut env)) {
                return Err(EngineError::Connect {
                    message: "SQLAllocHandle(ENV) failed".to_string(),
                });
            }
            (cli.set_env_attr)(env, SQL_ATTR_ODBC_VERSION, SQL_OV_ODBC3 as usize as *mut c_void, 0);

            let mut dbc: SqlHandle = SQL_NULL_HANDLE;
            if !ok((cli.alloc_handle)(SQL_HANDLE_DBC, env, &mut dbc)) {
                (cli.free_handle)(SQL_HANDLE_ENV, env);
                return Err(EngineError::Connect {
                    message: "SQLAllocHandle(DBC) failed".to_string(),
                });
            }

            let mut out_len: i16 = 0;
            let rc = (cli.driver_connect)(
                dbc,
                std::ptr::null_mut(),
                dsn.as_ptr(),
                dsn.len() as i16,
                std::ptr::null_mut(),
                0,
                &mut out_len,
                SQL_DRIVER_NOPROMPT,
            );
            if !ok(rc) {
                let message = diag(cli, SQL_HANDLE_DBC, dbc)
                    .unwrap_or_else(|| "SQLDriverConnect failed".to_string());
                (cli.free_handle)(SQL_HANDLE_DBC, dbc);
                (cli.free_handle)(SQL_HANDLE_ENV, env);
                return Err(EngineError::Connect { message });
            }

            debug!(
                "{designator} connected: {}",
                connstring::mask_connection_string(&dsn)
            );
            Ok(Box::new(Db2Connection {
                cli,
                env,
                dbc,
                connected: true,
            }))
        }
    }

    fn validate_connection_string(&self, connection_string: &str) -> bool {
        connection_string.contains("DATABASE=") && connection_string.contains("HOSTNAME=")
    }
}

/// First diagnostic record for a handle, if any.
fn diag(cli: &Db2Cli, handle_type: i16, handle: SqlHandle) -> Option<String> {
    let mut state = [0u8; 6];
    let mut native: i32 = 0;
    let mut text = [0u8; 512];
    let mut text_len: i16 = 0;
    let rc = unsafe {
        (cli.get_diag_rec)(
            handle_type,
            handle,
            1,
            state.as_mut_ptr(),
            &mut native,
            text.as_mut_ptr(),
            text.len() as i16,
            &mut text_len,
        )
    };
    if !ok(rc) {
        return None;
    }
    let state = String::from_utf8_lossy(&state[..5]).into_owned();
    let len = (text_len.max(0) as usize).min(text.len());
    let message = String::from_utf8_lossy(&text[..len]).into_owned();
    Some(format!("[{state}] {message}"))
}

pub struct Db2Connection {
    cli: &'static Db2Cli,
    env: SqlHandle,
    dbc: SqlHandle,
    connected: bool,
}

// The raw CLI handles make this type !Send by default. A connection is
// owned by exactly one queue thread at a time (queue handoff is locked),
// and DB2 CLI handles may move between threads when unshared.
unsafe impl Send for Db2Connection {}

impl Db2Connection {
    fn statement(&self) -> Result<SqlHandle, EngineError> {
        let mut stmt: SqlHandle = SQL_NULL_HANDLE;
        let rc = unsafe { (self.cli.alloc_handle)(SQL_HANDLE_STMT, self.dbc, &mut stmt) };
        if !ok(rc) {
            return Err(EngineError::Execute {
                message: "SQLAllocHandle(STMT) failed".to_string(),
            });
        }
        Ok(stmt)
    }

    fn run_sql(&mut self, sql: &str) -> Result<(), EngineError> {
        let stmt = self.statement()?;
        let rc = unsafe { (self.cli.exec_direct)(stmt, sql.as_ptr(), sql.len() as i32) };
        let outcome = if ok(rc) || rc == SQL_NO_DATA {
            Ok(())
        } else {
            Err(EngineError::Execute {
                message: diag(self.cli, SQL_HANDLE_STMT, stmt)
                    .unwrap_or_else(|| "SQLExecDirect failed".to_string()),
            })
        };
        unsafe { (self.cli.free_handle)(SQL_HANDLE_STMT, stmt) };
        outcome
    }

    fn column_name(&self, stmt: SqlHandle, index: u16) -> String {
        let mut name = [0u8; 130];
        let mut name_len: i16 = 0;
        let mut sql_type: i16 = 0;
        let mut size: usize = 0;
        let mut decimals: i16 = 0;
        let mut nullable: i16 = 0;
        let rc = unsafe {
            (self.cli.describe_col)(
                stmt,
                index,
                name.as_mut_ptr(),
                name.len() as i16,
                &mut name_len,
                &mut sql_type,
                &mut size,
                &mut decimals,
                &mut nullable,
            )
        };
        if !ok(rc) {
            return format!("col{index}");
        }
        let len = (name_len.max(0) as usize).min(name.len());
        String::from_utf8_lossy(&name[..len]).into_owned()
    }

    fn fetch_cell(&self, stmt: SqlHandle, index: u16) -> Value {
        let mut buffer = [0u8; 4096];
        let mut indicator: SqlLen = 0;
        let rc = unsafe {
            (self.cli.get_data)(
                stmt,
                index,
                SQL_C_CHAR,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len() as SqlLen,
                &mut indicator,
            )
        };
        if !ok(rc) || indicator == SQL_NULL_DATA {
            return Value::Null;
        }
        let len = (indicator.max(0) as usize).min(buffer.len() - 1);
        Value::from(String::from_utf8_lossy(&buffer[..len]).into_owned())
    }
}

impl EngineConnection for Db2Connection {
    fn engine(&self) -> EngineKind {
        EngineKind::Db2
    }

    fn execute(
        &mut self,
        request: &QueryRequest,
        params: &[ParamValue],
    ) -> Result<QueryResult, EngineError> {
        // Positional binds are interpolated as escaped literals; the CLI
        // bind path needs per-type descriptors the shim does not carry.
        let sql = interpolate_placeholders(&request.sql_template, params, |s| {
            self.escape_string(s)
        });

        let stmt = self.statement()?;
        unsafe {
            (self.cli.set_stmt_attr)(
                stmt,
                SQL_ATTR_QUERY_TIMEOUT,
                request.timeout_seconds.max(1) as usize as *mut c_void,
                0,
            );
        }

        let rc = unsafe { (self.cli.exec_direct)(stmt, sql.as_ptr(), sql.len() as i32) };
        if !ok(rc) && rc != SQL_NO_DATA {
            let message = diag(self.cli, SQL_HANDLE_STMT, stmt)
                .unwrap_or_else(|| "SQLExecDirect failed".to_string());
            unsafe { (self.cli.free_handle)(SQL_HANDLE_STMT, stmt) };
            return Err(EngineError::Execute { message });
        }

        let mut column_count: i16 = 0;
        unsafe { (self.cli.num_result_cols)(stmt, &mut column_count) };

        let result = if column_count > 0 {
            let column_names: Vec<String> = (1..=column_count as u16)
                .map(|i| self.column_name(stmt, i))
                .collect();
            let mut out = Vec::new();
            loop {
                let rc = unsafe { (self.cli.fetch)(stmt) };
                if rc == SQL_NO_DATA {
                    break;
                }
                if !ok(rc) {
                    let message = diag(self.cli, SQL_HANDLE_STMT, stmt)
                        .unwrap_or_else(|| "SQLFetch failed".to_string());
                    unsafe { (self.cli.free_handle)(SQL_HANDLE_STMT, stmt) };
                    return Err(EngineError::Execute { message });
                }
                let mut object = Map::new();
                for (i, name) in column_names.iter().enumerate() {
                    object.insert(name.clone(), self.fetch_cell(stmt, (i + 1) as u16));
                }
                out.push(Value::Object(object));
            }
            let row_count = out.len();
            let data_json = serde_json::to_string(&Value::Array(out)).map_err(|e| {
                EngineError::Execute {
                    message: e.to_string(),
                }
            })?;
            QueryResult::rows(data_json, row_count, column_names, 0)
        } else {
            let mut affected: SqlLen = 0;
            unsafe { (self.cli.row_count)(stmt, &mut affected) };
            QueryResult::rows("[]".to_string(), 0, Vec::new(), affected.max(0) as u64)
        };

        unsafe { (self.cli.free_handle)(SQL_HANDLE_STMT, stmt) };
        Ok(result)
    }

    fn health_check(&mut self) -> Result<(), EngineError> {
        self.run_sql("SELECT 1 FROM SYSIBM.SYSDUMMY1")
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        let rc = unsafe { (self.cli.end_tran)(SQL_HANDLE_DBC, self.dbc, SQL_ROLLBACK) };
        if !ok(rc) {
            warn!("DB2 reset rollback returned {rc}");
        }
        unsafe {
            (self.cli.set_connect_attr)(
                self.dbc,
                SQL_ATTR_AUTOCOMMIT,
                SQL_AUTOCOMMIT_ON as *mut c_void,
                0,
            );
        }
        Ok(())
    }

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<(), EngineError> {
        unsafe {
            (self.cli.set_connect_attr)(
                self.dbc,
                SQL_ATTR_AUTOCOMMIT,
                SQL_AUTOCOMMIT_OFF as *mut c_void,
                0,
            );
        }
        self.run_sql(&format!(
            "SET CURRENT ISOLATION = {}",
            isolation_to_db2(level)
        ))
    }

    fn commit_transaction(&mut self) -> Result<(), EngineError> {
        let rc = unsafe { (self.cli.end_tran)(SQL_HANDLE_DBC, self.dbc, SQL_COMMIT) };
        self.restore_autocommit();
        if ok(rc) {
            Ok(())
        } else {
            Err(EngineError::Execute {
                message: diag(self.cli, SQL_HANDLE_DBC, self.dbc)
                    .unwrap_or_else(|| "SQLEndTran(COMMIT) failed".to_string()),
            })
        }
    }

    fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        let rc = unsafe { (self.cli.end_tran)(SQL_HANDLE_DBC, self.dbc, SQL_ROLLBACK) };
        self.restore_autocommit();
        if ok(rc) {
            Ok(())
        } else {
            Err(EngineError::Execute {
                message: diag(self.cli, SQL_HANDLE_DBC, self.dbc)
                    .unwrap_or_else(|| "SQLEndTran(ROLLBACK) failed".to_string()),
            })
        }
    }

    fn prepare_statement(&mut self, _name: &str, _sql: &str) -> Result<(), EngineError> {
        // Statement handles are per-execution in this shim; prepared-name
        // bookkeeping lives in the handle's cache.
        Ok(())
    }

    fn unprepare_statement(&mut self, _name: &str) -> Result<(), EngineError> {
        Ok(())
    }

    fn escape_string(&self, input: &str) -> String {
        input.replace('\'', "''")
    }

    fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        unsafe {
            (self.cli.disconnect)(self.dbc);
            (self.cli.free_handle)(SQL_HANDLE_DBC, self.dbc);
            (self.cli.free_handle)(SQL_HANDLE_ENV, self.env);
        }
    }
}

impl Db2Connection {
    fn restore_autocommit(&self) {
        unsafe {
            (self.cli.set_connect_attr)(
                self.dbc,
                SQL_ATTR_AUTOCOMMIT,
                SQL_AUTOCOMMIT_ON as *mut c_void,
                0,
            );
        }
    }
}

impl Drop for Db2Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn isolation_to_db2(level: IsolationLevel) -> &'static str {
    match level {
        IsolationLevel::ReadUncommitted => "UR",
        IsolationLevel::ReadCommitted => "CS",
        IsolationLevel::RepeatableRead => "RS",
        IsolationLevel::Serializable => "RR",
    }
}

/// Substitute `?` placeholders with escaped literal values, left to right.
fn interpolate_placeholders(
    sql: &str,
    params: &[ParamValue],
    escape: impl Fn(&str) -> String,
) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut next = params.iter();
    for ch in sql.chars() {
        if ch == '?' {
            match next.next() {
                Some(ParamValue::Integer(v)) => out.push_str(&v.to_string()),
                Some(ParamValue::Float(v)) => out.push_str(&v.to_string()),
                Some(ParamValue::Boolean(v)) => out.push_str(if *v { "1" } else { "0" }),
                Some(other) => {
                    out.push('\'');
                    out.push_str(&escape(&other.as_text()));
                    out.push('\'');
                }
                None => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}
