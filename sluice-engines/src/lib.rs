//! # sluice-engines
//!
//! Concrete engine implementations behind the `DatabaseEngine` /
//! `EngineConnection` trait seam: SQLite (rusqlite), PostgreSQL (postgres),
//! MySQL (mysql), and DB2 (runtime-loaded CLI). Also home of the engine
//! registry, the connection handle with its transaction guard and
//! wall-clock timeout, and the prepared-statement LRU cache.

pub mod connection;
pub mod db2;
pub mod mysql_engine;
pub mod postgres_engine;
pub mod prepared;
pub mod registry;
pub mod sqlite;

pub use connection::DatabaseHandle;
pub use prepared::{PreparedStatement, PreparedStatementCache};
pub use registry::EngineRegistry;
