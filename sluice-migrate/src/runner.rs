//! The migration pipeline: validate → discover → sort → execute scripts →
//! apply transactionally. Run by each lead queue at startup when
//! `test_migration` is enabled for its database.

use std::sync::Arc;

use tracing::{debug, error, info};

use sluice_core::config::DatabaseConfig;
use sluice_core::errors::MigrationError;
use sluice_core::types::{IsolationLevel, QueryRequest};
use sluice_engines::DatabaseHandle;

use crate::discover::{database_module_path, discover, read_migration_file};
use crate::script::ScriptEngineFactory;
use crate::source::{MigrationSource, PayloadStore};
use crate::statements::split_statements;

/// Everything the migration pipeline needs besides a connection: the
/// payload store and a way to create script engines.
pub struct MigrationContext {
    pub store: Arc<PayloadStore>,
    pub scripts: Arc<dyn ScriptEngineFactory>,
}

/// Run the full migration batch for one database on its lead connection.
/// Returns the number of files applied. The batch is fail-fast: the first
/// failing file stops the run, and already-committed files stay committed
/// (each file applies in its own transaction).
pub fn run_migrations(
    config: &DatabaseConfig,
    ctx: &MigrationContext,
    connection: &mut DatabaseHandle,
    designator: &str,
) -> Result<usize, MigrationError> {
    let engine_kind = config.engine_kind().map_err(|e| MigrationError::Config {
        message: e.to_string(),
    })?;
    let migrations = config
        .migrations
        .as_deref()
        .ok_or_else(|| MigrationError::Config {
            message: format!("database '{}' has no migrations source", config.name),
        })?;
    let source = MigrationSource::parse(migrations)?;
    let design_name = source.design_name()?;
    let schema_name = config.effective_schema().to_string();
    let engine_name = engine_kind.as_str();

    let files = discover(&source, &ctx.store)?;
    debug!(
        "{designator} found {} migration files for design '{design_name}'",
        files.len()
    );

    // The shared schema module is loaded once and reused across the batch.
    let mut engine = ctx.scripts.create();
    let module_path = database_module_path(&source)?;
    let module = read_migration_file(&source, &ctx.store, &module_path).map_err(|_| {
        MigrationError::Discovery {
            message: format!("database module '{module_path}' not found"),
        }
    })?;
    engine.load_database_module(&module)?;

    let mut applied = 0usize;
    for file in &files {
        debug!(
            "{designator} executing migration: {} (engine={engine_name}, design={design_name}, schema={})",
            file.path,
            if schema_name.is_empty() { "(none)" } else { &schema_name }
        );

        let content = read_migration_file(&source, &ctx.store, &file.path)?;
        let query_count = engine.evaluate_migration(&file.path, &content)?;
        let sql = engine.run_migration(engine_name, &design_name, &schema_name)?;

        let statements = split_statements(&sql);
        if statements.is_empty() {
            return Err(MigrationError::Apply {
                file: file.path.clone(),
                message: "no SQL generated".to_string(),
            });
        }
        debug!(
            "{designator} migration {} returned {} bytes in {} statements containing {} queries",
            file.path,
            sql.len(),
            statements.len(),
            query_count
        );

        apply_transaction(connection, &file.path, &statements, designator)?;
        info!("{designator} migration {} imported successfully", file.path);
        applied += 1;
    }

    info!("{designator} applied {applied} migration file(s) for '{}'", config.name);
    Ok(applied)
}

/// Execute one migration file's statements inside a single transaction:
/// commit on success, rollback on the first failure.
fn apply_transaction(
    connection: &mut DatabaseHandle,
    file: &str,
    statements: &[String],
    designator: &str,
) -> Result<(), MigrationError> {
    connection.begin_transaction(IsolationLevel::ReadCommitted)?;
    debug!(
        "{designator} started transaction for migration {file} ({} statements)",
        statements.len()
    );

    for (index, statement) in statements.iter().enumerate() {
        let request = QueryRequest::new("migration_statement", statement.clone()).with_timeout(30);
        let outcome = connection.execute(&request, &[]);
        let failed = match &outcome {
            Ok(result) => !result.success,
            Err(_) => true,
        };
        if failed {
            let message = match outcome {
                Ok(result) => result
                    .error_message
                    .unwrap_or_else(|| "statement failed".to_string()),
                Err(e) => e.to_string(),
            };
            error!(
                "{designator} statement {} of migration {file} failed: {message}",
                index + 1
            );
            if let Err(e) = connection.rollback_transaction() {
                error!("{designator} rollback of migration {file} failed: {e}");
            }
            return Err(MigrationError::Apply {
                file: file.to_string(),
                message,
            });
        }
    }

    connection.commit_transaction().map_err(|e| {
        error!("{designator} commit of migration {file} failed: {e}");
        MigrationError::Apply {
            file: file.to_string(),
            message: e.to_string(),
        }
    })?;
    debug!("{designator} migration {file} committed");
    Ok(())
}
