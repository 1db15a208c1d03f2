//! The script-engine contract.
//!
//! The embedded scripting runtime is a black box to this crate: it loads
//! the shared schema module, evaluates one migration file at a time, and
//! produces the generated SQL via a `run_migration`-style entry point that
//! receives the engine, design, and schema names. Type mismatches and
//! script failures surface as `MigrationError::Script` for the file at
//! hand; the batch is fail-fast.

use sluice_core::errors::MigrationError;

pub trait ScriptEngine: Send {
    /// Load the shared schema/type-mapping module (`database.lua`). Called
    /// once per batch; later migration files reuse the loaded module.
    fn load_database_module(&mut self, source: &[u8]) -> Result<(), MigrationError>;

    /// Evaluate one migration file, returning the number of query
    /// descriptors it declares (used only for logging).
    fn evaluate_migration(&mut self, name: &str, content: &[u8]) -> Result<usize, MigrationError>;

    /// Produce the SQL for the most recently evaluated migration.
    fn run_migration(
        &mut self,
        engine_name: &str,
        design_name: &str,
        schema_name: &str,
    ) -> Result<String, MigrationError>;
}

/// Creates a fresh script engine per migration batch.
pub trait ScriptEngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn ScriptEngine>;
}

impl<F> ScriptEngineFactory for F
where
    F: Fn() -> Box<dyn ScriptEngine> + Send + Sync,
{
    fn create(&self) -> Box<dyn ScriptEngine> {
        self()
    }
}
