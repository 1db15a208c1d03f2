//! The connection handle: one native connection plus its transaction
//! bookkeeping, prepared-statement cache, and timeout enforcement.
//!
//! A handle is owned by exactly one queue thread at a time (queue-level
//! locking covers the handoff), so no internal locking happens here.

use std::time::{Instant, SystemTime};

use tracing::{debug, warn};

use sluice_core::errors::EngineError;
use sluice_core::params::ParamValue;
use sluice_core::types::{EngineKind, IsolationLevel, QueryRequest, QueryResult, Transaction};
use sluice_core::EngineConnection;

use crate::prepared::{PreparedStatement, PreparedStatementCache};

pub struct DatabaseHandle {
    kind: EngineKind,
    designator: String,
    inner: Box<dyn EngineConnection>,
    current_transaction: Option<Transaction>,
    prepared: PreparedStatementCache,
    pub connected_since: SystemTime,
    pub last_health_check: Option<Instant>,
    pub consecutive_failures: u32,
    next_transaction_id: u64,
    closed: bool,
}

impl DatabaseHandle {
    pub fn new(
        kind: EngineKind,
        designator: impl Into<String>,
        inner: Box<dyn EngineConnection>,
        prepared_capacity: usize,
    ) -> Self {
        Self {
            kind,
            designator: designator.into(),
            inner,
            current_transaction: None,
            prepared: PreparedStatementCache::new(prepared_capacity),
            connected_since: SystemTime::now(),
            last_health_check: None,
            consecutive_failures: 0,
            next_transaction_id: 0,
            closed: false,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn designator(&self) -> &str {
        &self.designator
    }

    pub fn in_transaction(&self) -> bool {
        self.current_transaction
            .as_ref()
            .is_some_and(|t| t.active)
    }

    pub fn prepared_statement_count(&self) -> usize {
        self.prepared.len()
    }

    /// Execute a request. The engine sets its native statement timeout;
    /// this layer adds the wall-clock guard: an execution that comes back
    /// after the deadline has its result discarded and reports a timeout,
    /// because some native timeouts are server-side only.
    pub fn execute(
        &mut self,
        request: &QueryRequest,
        params: &[ParamValue],
    ) -> Result<QueryResult, EngineError> {
        if request.prefer_prepared {
            if let Some(name) = request.prepared_name.clone() {
                self.ensure_prepared(&name, &request.sql_template)?;
            }
        }

        let timeout = request.timeout_seconds.max(1);
        let started = Instant::now();
        let outcome = self.inner.execute(request, params);
        let elapsed = started.elapsed();

        if elapsed.as_secs() >= u64::from(timeout) {
            warn!(
                "{} query '{}' exceeded {}s wall clock (took {:?}); discarding result",
                self.designator, request.query_id, timeout, elapsed
            );
            drop(outcome);
            return Err(EngineError::QueryTimeout { seconds: timeout });
        }

        let mut result = outcome?;
        result.execution_time_ms = elapsed.as_millis() as u64;
        Ok(result)
    }

    pub fn health_check(&mut self) -> Result<(), EngineError> {
        let outcome = self.inner.health_check();
        self.last_health_check = Some(Instant::now());
        match &outcome {
            Ok(()) => self.consecutive_failures = 0,
            Err(_) => self.consecutive_failures += 1,
        }
        outcome
    }

    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.current_transaction = None;
        self.inner.reset()
    }

    /// Begin a transaction. A connection must not begin a new transaction
    /// while one is active.
    pub fn begin_transaction(&mut self, level: IsolationLevel) -> Result<(), EngineError> {
        if self.in_transaction() {
            return Err(EngineError::TransactionActive);
        }
        self.inner.begin_transaction(level)?;
        self.next_transaction_id += 1;
        let id = format!("{}-txn-{}", self.designator, self.next_transaction_id);
        debug!("{} began transaction {id}", self.designator);
        self.current_transaction = Some(Transaction::begin(id, level));
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> Result<(), EngineError> {
        let mut txn = self
            .current_transaction
            .take()
            .filter(|t| t.active)
            .ok_or(EngineError::NoTransaction)?;
        self.inner.commit_transaction()?;
        txn.active = false;
        debug!("{} committed transaction {}", self.designator, txn.id);
        Ok(())
    }

    pub fn rollback_transaction(&mut self) -> Result<(), EngineError> {
        let mut txn = self
            .current_transaction
            .take()
            .filter(|t| t.active)
            .ok_or(EngineError::NoTransaction)?;
        self.inner.rollback_transaction()?;
        txn.active = false;
        debug!("{} rolled back transaction {}", self.designator, txn.id);
        Ok(())
    }

    /// Prepare `name` in the live session if not already cached. A cache
    /// eviction deallocates the displaced statement from the session first.
    pub fn ensure_prepared(&mut self, name: &str, sql: &str) -> Result<(), EngineError> {
        if self.prepared.touch(name).is_some() {
            return Ok(());
        }
        self.inner.prepare_statement(name, sql)?;
        if let Some(evicted) = self.prepared.insert(PreparedStatement::new(name, sql)) {
            debug!(
                "{} evicting prepared statement '{}' for '{}'",
                self.designator, evicted.name, name
            );
            if let Err(e) = self.inner.unprepare_statement(&evicted.name) {
                warn!(
                    "{} failed to deallocate evicted statement '{}': {e}",
                    self.designator, evicted.name
                );
            }
        }
        Ok(())
    }

    pub fn escape_string(&self, input: &str) -> String {
        self.inner.escape_string(input)
    }

    /// Release all cached prepared statements and the native connection.
    /// Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.in_transaction() {
            let _ = self.rollback_transaction();
        }
        for stmt in self.prepared.drain() {
            if let Err(e) = self.inner.unprepare_statement(&stmt.name) {
                debug!(
                    "{} deallocate '{}' at close failed: {e}",
                    self.designator, stmt.name
                );
            }
        }
        self.inner.close();
    }
}

impl Drop for DatabaseHandle {
    fn drop(&mut self) {
        self.close();
    }
}
