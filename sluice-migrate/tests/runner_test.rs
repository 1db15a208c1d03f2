//! End-to-end migration runs against an in-memory SQLite database with a
//! scripted mock engine.

use std::sync::Arc;

use sluice_core::config::DatabaseConfig;
use sluice_core::errors::MigrationError;
use sluice_core::types::QueryRequest;
use sluice_engines::{DatabaseHandle, EngineRegistry};
use sluice_migrate::{
    run_migrations, MigrationContext, PayloadStore, ScriptEngine, ScriptEngineFactory,
};

/// Emits the evaluated file's content as the generated SQL, prefixed with
/// a header recording the call arguments so tests can assert the contract.
struct EchoScriptEngine {
    module_loaded: bool,
    last_content: Option<String>,
}

impl ScriptEngine for EchoScriptEngine {
    fn load_database_module(&mut self, source: &[u8]) -> Result<(), MigrationError> {
        if source.is_empty() {
            return Err(MigrationError::Script {
                file: "database.lua".to_string(),
                message: "empty module".to_string(),
            });
        }
        self.module_loaded = true;
        Ok(())
    }

    fn evaluate_migration(&mut self, name: &str, content: &[u8]) -> Result<usize, MigrationError> {
        assert!(self.module_loaded, "module must load before evaluation");
        let text = String::from_utf8(content.to_vec()).map_err(|e| MigrationError::Script {
            file: name.to_string(),
            message: e.to_string(),
        })?;
        if text.contains("SYNTAX ERROR") {
            return Err(MigrationError::Script {
                file: name.to_string(),
                message: "syntax error".to_string(),
            });
        }
        let count = text.matches(';').count();
        self.last_content = Some(text);
        Ok(count)
    }

    fn run_migration(
        &mut self,
        engine_name: &str,
        design_name: &str,
        _schema_name: &str,
    ) -> Result<String, MigrationError> {
        assert_eq!(engine_name, "sqlite");
        assert_eq!(design_name, "app");
        self.last_content.take().ok_or_else(|| MigrationError::Script {
            file: "<none>".to_string(),
            message: "run_migration called before evaluate".to_string(),
        })
    }
}

struct EchoFactory;

impl ScriptEngineFactory for EchoFactory {
    fn create(&self) -> Box<dyn ScriptEngine> {
        Box::new(EchoScriptEngine {
            module_loaded: false,
            last_content: None,
        })
    }
}

fn sqlite_config(migrations: &str) -> DatabaseConfig {
    DatabaseConfig {
        name: "app".to_string(),
        engine: Some("sqlite".to_string()),
        database: Some(":memory:".to_string()),
        migrations: Some(migrations.to_string()),
        test_migration: Some(true),
        ..Default::default()
    }
}

fn open_handle(config: &DatabaseConfig) -> DatabaseHandle {
    EngineRegistry::with_builtin_engines()
        .open_connection(config, "DQM-app-00")
        .unwrap()
}

fn context(store: PayloadStore) -> MigrationContext {
    MigrationContext {
        store: Arc::new(store),
        scripts: Arc::new(EchoFactory),
    }
}

#[test]
fn applies_files_in_sequence_order() {
    let mut store = PayloadStore::new();
    store.insert("app/database.lua", "-- schema module");
    store.insert(
        "app/app_01001.lua",
        "CREATE TABLE second (id INTEGER);\n-- QUERY DELIMITER\nINSERT INTO second VALUES (1);",
    );
    store.insert("app/app_01000.lua", "CREATE TABLE first (id INTEGER);");

    let config = sqlite_config("PAYLOAD:app");
    let mut handle = open_handle(&config);
    let applied = run_migrations(&config, &context(store), &mut handle, "DQM-app-00").unwrap();
    assert_eq!(applied, 2);

    // Both tables exist and the insert from the second file committed.
    let result = handle
        .execute(
            &QueryRequest::new("check", "SELECT COUNT(*) AS n FROM second"),
            &[],
        )
        .unwrap();
    assert_eq!(result.rows_as_json()[0]["n"], 1);
    handle
        .execute(&QueryRequest::new("check", "SELECT * FROM first"), &[])
        .unwrap();
}

#[test]
fn failing_file_stops_the_batch_and_rolls_back() {
    let mut store = PayloadStore::new();
    store.insert("app/database.lua", "-- schema module");
    store.insert("app/app_01000.lua", "CREATE TABLE ok (id INTEGER);");
    store.insert(
        "app/app_01001.lua",
        "INSERT INTO ok VALUES (1);\n-- QUERY DELIMITER\nINSERT INTO missing_table VALUES (1);",
    );
    store.insert("app/app_01002.lua", "CREATE TABLE never (id INTEGER);");

    let config = sqlite_config("PAYLOAD:app");
    let mut handle = open_handle(&config);
    let err = run_migrations(&config, &context(store), &mut handle, "DQM-app-00").unwrap_err();
    assert!(matches!(err, MigrationError::Apply { ref file, .. } if file.contains("app_01001")));

    // First file stays committed, failing file rolled back, later file never ran.
    let count = handle
        .execute(&QueryRequest::new("check", "SELECT COUNT(*) AS n FROM ok"), &[])
        .unwrap();
    assert_eq!(count.rows_as_json()[0]["n"], 0);
    assert!(handle
        .execute(&QueryRequest::new("check", "SELECT * FROM never"), &[])
        .is_err());
}

#[test]
fn script_error_fails_that_file() {
    let mut store = PayloadStore::new();
    store.insert("app/database.lua", "-- schema module");
    store.insert("app/app_01000.lua", "SYNTAX ERROR here");

    let config = sqlite_config("PAYLOAD:app");
    let mut handle = open_handle(&config);
    let err = run_migrations(&config, &context(store), &mut handle, "DQM-app-00").unwrap_err();
    assert!(matches!(err, MigrationError::Script { .. }));
}

#[test]
fn missing_database_module_is_a_discovery_failure() {
    let mut store = PayloadStore::new();
    store.insert("app/app_01000.lua", "CREATE TABLE t (id INTEGER);");

    let config = sqlite_config("PAYLOAD:app");
    let mut handle = open_handle(&config);
    let err = run_migrations(&config, &context(store), &mut handle, "DQM-app-00").unwrap_err();
    assert!(matches!(err, MigrationError::Discovery { .. }));
}

#[test]
fn missing_source_is_a_config_failure() {
    let mut config = sqlite_config("PAYLOAD:app");
    config.migrations = None;
    let mut handle = open_handle(&config);
    let err = run_migrations(
        &config,
        &context(PayloadStore::new()),
        &mut handle,
        "DQM-app-00",
    )
    .unwrap_err();
    assert!(matches!(err, MigrationError::Config { .. }));
}
