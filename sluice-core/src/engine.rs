//! The engine trait seam.
//!
//! Each concrete engine (PostgreSQL, MySQL, SQLite, DB2) implements
//! `DatabaseEngine` and yields `EngineConnection` values. A connection is
//! owned by exactly one queue thread at a time, so implementations need no
//! internal locking for execution; the queue serializes access.

use crate::config::DatabaseConfig;
use crate::errors::EngineError;
use crate::params::ParamValue;
use crate::types::{EngineKind, IsolationLevel, QueryRequest, QueryResult};

/// Process-wide interface for one engine. Registered once at subsystem
/// init; lookup of an unregistered engine is a recoverable
/// `EngineError::Unavailable`, never a panic.
pub trait DatabaseEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Engine identifier used in logs and the registry ("postgresql", ...).
    fn name(&self) -> &'static str;

    /// Open a native connection. The designator is a short label carried
    /// into connection logs.
    fn connect(
        &self,
        config: &DatabaseConfig,
        designator: &str,
    ) -> Result<Box<dyn EngineConnection>, EngineError>;

    fn validate_connection_string(&self, connection_string: &str) -> bool;

    fn build_connection_string(&self, config: &DatabaseConfig) -> String {
        crate::connstring::build_connection_string(self.kind(), config)
    }
}

impl std::fmt::Debug for dyn DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseEngine")
            .field("name", &self.name())
            .finish()
    }
}

/// One live native connection.
///
/// Implementations set any statement-level native timeout before executing
/// (server-side, best effort); the owning handle additionally wall-clock
/// guards the call because some native timeouts never fire during pure
/// client hangs.
pub trait EngineConnection: Send {
    fn engine(&self) -> EngineKind;

    /// Execute positional SQL with bound parameters and serialize the
    /// result rows to array-of-objects JSON.
    fn execute(
        &mut self,
        request: &QueryRequest,
        params: &[ParamValue],
    ) -> Result<QueryResult, EngineError>;

    /// Trivial round trip. Failure does not destroy the connection;
    /// the caller (queue heartbeat) decides policy.
    fn health_check(&mut self) -> Result<(), EngineError>;

    /// Best-effort recovery of a connection in an unknown state without a
    /// full reconnect.
    fn reset(&mut self) -> Result<(), EngineError>;

    fn begin_transaction(&mut self, level: IsolationLevel) -> Result<(), EngineError>;
    fn commit_transaction(&mut self) -> Result<(), EngineError>;
    fn rollback_transaction(&mut self) -> Result<(), EngineError>;

    /// Prepare a named statement in the live session.
    fn prepare_statement(&mut self, name: &str, sql: &str) -> Result<(), EngineError>;

    /// Deallocate a named statement from the live session.
    fn unprepare_statement(&mut self, name: &str) -> Result<(), EngineError>;

    fn escape_string(&self, input: &str) -> String;

    /// Release the native connection. Called once on teardown.
    fn close(&mut self);
}
