//! # sluice-migrate
//!
//! Versioned schema migrations for the Sluice database layer: source
//! descriptors (`PAYLOAD:` virtual store or filesystem directory), file
//! discovery and sequence sorting, the black-box script-engine contract
//! that turns migration scripts into SQL, and the transactional apply
//! pipeline run by each lead queue at startup.

pub mod discover;
pub mod runner;
pub mod script;
pub mod source;
pub mod statements;

pub use discover::{discover, MigrationFile};
pub use runner::{run_migrations, MigrationContext};
pub use script::{ScriptEngine, ScriptEngineFactory};
pub use source::{MigrationSource, PayloadFile, PayloadStore};
pub use statements::split_statements;
