//! Database queues: the lead/worker model.
//!
//! One lead queue per logical database owns the persistent connection and
//! runs the startup sequence (connect → bootstrap → migrations →
//! re-bootstrap → spawn workers) before entering its processing loop.
//! Worker queues hold their own connections, opened lazily in their
//! threads. Each queue is one OS thread pulling typed work from a bounded
//! channel; results rendezvous with submitters through the pending-result
//! manager.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde_json::json;
use tracing::{debug, error, info, warn};

use sluice_core::config::DatabaseConfig;
use sluice_core::connstring;
use sluice_core::errors::{EngineError, QueueError};
use sluice_core::logging::queue_designator;
use sluice_core::params::{convert_named_to_positional, parse_typed_parameters, ParamValue};
use sluice_core::types::{QueryRequest, QueryResult, QueueClass};
use sluice_engines::{DatabaseHandle, EngineRegistry};
use sluice_migrate::{run_migrations, MigrationContext};

use crate::bootstrap::process_bootstrap_rows;
use crate::pending::PendingResultManager;
use crate::qtc::{QueryCache, QueryCacheEntry};

const QUEUE_CHANNEL_BOUND: usize = 1024;
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(250);
const BOOTSTRAP_TIMEOUT_SECS: u32 = 5;
const DEFAULT_BOOTSTRAP_QUERY: &str = "SELECT 42 AS test_value";

/// Whether a queue is the lead for its database or a class worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Lead,
    Worker(QueueClass),
}

impl QueueRole {
    pub fn is_lead(&self) -> bool {
        matches!(self, QueueRole::Lead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueRole::Lead => "Lead",
            QueueRole::Worker(class) => class.as_str(),
        }
    }

    /// Tag letters shown in the queue designator.
    fn tags(&self) -> &'static str {
        match self {
            QueueRole::Lead => "LSMFC",
            QueueRole::Worker(QueueClass::Slow) => "S",
            QueueRole::Worker(QueueClass::Medium) => "M",
            QueueRole::Worker(QueueClass::Fast) => "F",
            QueueRole::Worker(QueueClass::Cache) => "C",
        }
    }
}

enum QueueCommand {
    Execute(QueryRequest),
    Shutdown,
}

/// Lead-only bootstrap state, guarded by its own lock (distinct from the
/// connection lock so heartbeat and bootstrap cannot deadlock).
#[derive(Debug, Default)]
pub struct BootstrapState {
    /// Monotonic: false → true, never reset.
    pub completed: bool,
    pub empty_database: bool,
    /// High-water marks, monotonically non-decreasing in-process.
    pub latest_available_migration: i64,
    pub latest_applied_migration: i64,
}

pub(crate) struct QueueShared {
    pub config: DatabaseConfig,
    pub role: QueueRole,
    pub queue_number: usize,
    pub designator: String,
    pub registry: Arc<EngineRegistry>,
    pub pending: Arc<PendingResultManager>,
    pub migrations: Option<Arc<MigrationContext>>,

    /// The queue's persistent connection. Shared between the worker and
    /// (for leads) the heartbeat thread; one at a time under this lock.
    pub connection: Mutex<Option<DatabaseHandle>>,
    pub is_connected: AtomicBool,
    pub shutdown: AtomicBool,

    pub bootstrap: Mutex<BootstrapState>,
    pub bootstrap_cond: Condvar,
    initial_connection: Mutex<bool>,
    initial_connection_cond: Condvar,

    /// Lead-only query cache, rebuilt wholesale by each bootstrap.
    pub query_cache: RwLock<QueryCache>,

    pub total_queries_processed: AtomicU64,
    pub last_heartbeat: Mutex<Option<Instant>>,

    /// Lead-only spawned worker queues.
    pub children: Mutex<Vec<DatabaseQueue>>,
    next_child: AtomicUsize,
}

/// One queue instance: its shared state, submission channel, and threads.
pub struct DatabaseQueue {
    shared: Arc<QueueShared>,
    sender: Sender<QueueCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseQueue {
    /// Create and start the lead queue for a database. The worker thread
    /// runs the startup sequence before processing work; the heartbeat
    /// thread monitors the persistent connection.
    pub fn new_lead(
        config: DatabaseConfig,
        registry: Arc<EngineRegistry>,
        pending: Arc<PendingResultManager>,
        migrations: Option<Arc<MigrationContext>>,
    ) -> DatabaseQueue {
        let queue = Self::spawn(config, QueueRole::Lead, 0, registry, pending, migrations);
        let shared = Arc::clone(&queue.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-heartbeat", shared.designator))
            .spawn(move || crate::heartbeat::heartbeat_loop(shared))
            .expect("failed to spawn heartbeat thread");
        *queue.heartbeat.lock().expect("heartbeat slot") = Some(handle);
        queue
    }

    /// Create and start a worker queue of the given class. Normally done
    /// by the lead's startup sequence from its `queues` config.
    pub fn new_worker(
        config: DatabaseConfig,
        class: QueueClass,
        queue_number: usize,
        registry: Arc<EngineRegistry>,
        pending: Arc<PendingResultManager>,
    ) -> DatabaseQueue {
        Self::spawn(
            config,
            QueueRole::Worker(class),
            queue_number,
            registry,
            pending,
            None,
        )
    }

    fn spawn(
        config: DatabaseConfig,
        role: QueueRole,
        queue_number: usize,
        registry: Arc<EngineRegistry>,
        pending: Arc<PendingResultManager>,
        migrations: Option<Arc<MigrationContext>>,
    ) -> DatabaseQueue {
        let designator = queue_designator(&config.name, queue_number, role.tags());
        let (sender, receiver) = bounded(QUEUE_CHANNEL_BOUND);
        let shared = Arc::new(QueueShared {
            config,
            role,
            queue_number,
            designator: designator.clone(),
            registry,
            pending,
            migrations,
            connection: Mutex::new(None),
            is_connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            bootstrap: Mutex::new(BootstrapState::default()),
            bootstrap_cond: Condvar::new(),
            initial_connection: Mutex::new(false),
            initial_connection_cond: Condvar::new(),
            query_cache: RwLock::new(QueryCache::new()),
            total_queries_processed: AtomicU64::new(0),
            last_heartbeat: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            next_child: AtomicUsize::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(designator)
            .spawn(move || worker_loop(thread_shared, receiver))
            .expect("failed to spawn queue worker thread");

        DatabaseQueue {
            shared,
            sender,
            worker: Mutex::new(Some(worker)),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn database_name(&self) -> &str {
        &self.shared.config.name
    }

    /// Connection-level default typed parameters from this database's
    /// config, if any.
    pub fn default_params(&self) -> Option<&serde_json::Value> {
        self.shared.config.default_params.as_ref()
    }

    pub fn role(&self) -> QueueRole {
        self.shared.role
    }

    pub fn designator(&self) -> &str {
        &self.shared.designator
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Depth of this queue's own FIFO.
    pub fn depth(&self) -> usize {
        self.sender.len()
    }

    /// Depth including spawned worker queues.
    pub fn total_depth(&self) -> usize {
        let children = self.shared.children.lock().map(|c| {
            c.iter().map(DatabaseQueue::depth).sum::<usize>()
        });
        self.depth() + children.unwrap_or(0)
    }

    pub fn queries_processed(&self) -> u64 {
        self.shared.total_queries_processed.load(Ordering::Relaxed)
    }

    /// Submit a query to this queue's FIFO.
    pub fn submit(&self, request: QueryRequest) -> Result<(), QueueError> {
        if self.is_shutdown() {
            return Err(QueueError::ShuttingDown);
        }
        self.sender
            .send(QueueCommand::Execute(request))
            .map_err(|_| QueueError::ShuttingDown)
    }

    /// Route a query to a worker queue of the given class, falling back to
    /// this (lead) queue when no worker of that class exists. Same-class
    /// workers are selected round-robin.
    pub fn submit_routed(
        &self,
        class: QueueClass,
        request: QueryRequest,
    ) -> Result<(), QueueError> {
        if self.is_shutdown() {
            return Err(QueueError::ShuttingDown);
        }
        let children = self
            .shared
            .children
            .lock()
            .map_err(|_| QueueError::ShuttingDown)?;
        let matching: Vec<&DatabaseQueue> = children
            .iter()
            .filter(|c| c.shared.role == QueueRole::Worker(class))
            .collect();
        if matching.is_empty() {
            drop(children);
            return self.submit(request);
        }
        let index = self.shared.next_child.fetch_add(1, Ordering::Relaxed) % matching.len();
        matching[index].submit(request)
    }

    /// Look up a bootstrap-seeded query template (lead only).
    pub fn lookup_query(&self, query_ref: i64) -> Option<QueryCacheEntry> {
        self.shared
            .query_cache
            .read()
            .ok()
            .and_then(|cache| cache.lookup(query_ref).cloned())
    }

    pub fn query_cache_len(&self) -> usize {
        self.shared.query_cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn bootstrap_completed(&self) -> bool {
        self.shared.bootstrap.lock().map(|b| b.completed).unwrap_or(false)
    }

    pub fn is_empty_database(&self) -> bool {
        self.shared
            .bootstrap
            .lock()
            .map(|b| b.empty_database)
            .unwrap_or(false)
    }

    /// (latest_available_migration, latest_applied_migration).
    pub fn migration_marks(&self) -> (i64, i64) {
        self.shared
            .bootstrap
            .lock()
            .map(|b| (b.latest_available_migration, b.latest_applied_migration))
            .unwrap_or((0, 0))
    }

    /// Wait for the lead's first connection attempt to finish (success or
    /// failure). Worker-class queues report immediately true without
    /// blocking, independent of actual connection state.
    pub fn wait_for_initial_connection(&self, timeout: Duration) -> bool {
        if !self.shared.role.is_lead() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let Ok(mut attempted) = self.shared.initial_connection.lock() else {
            return false;
        };
        while !*attempted {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self
                .shared
                .initial_connection_cond
                .wait_timeout(attempted, deadline - now)
            {
                Ok((guard, _)) => attempted = guard,
                Err(_) => return false,
            }
        }
        true
    }

    /// Wait for bootstrap completion (lead only; workers are immediately
    /// true). Completion is signaled on success and failure alike, so
    /// startup sequencing never blocks indefinitely.
    pub fn wait_for_bootstrap(&self, timeout: Duration) -> bool {
        if !self.shared.role.is_lead() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let Ok(mut state) = self.shared.bootstrap.lock() else {
            return false;
        };
        while !state.completed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self
                .shared
                .bootstrap_cond
                .wait_timeout(state, deadline - now)
            {
                Ok((guard, _)) => state = guard,
                Err(_) => return false,
            }
        }
        true
    }

    /// One line of queue statistics.
    pub fn stats(&self) -> serde_json::Value {
        let children: Vec<serde_json::Value> = self
            .shared
            .children
            .lock()
            .map(|c| c.iter().map(DatabaseQueue::stats).collect())
            .unwrap_or_default();
        let mut stats = json!({
            "database": self.shared.config.name,
            "queue_type": self.shared.role.as_str(),
            "queue_number": self.shared.queue_number,
            "connected": self.is_connected(),
            "queries_processed": self.queries_processed(),
            "depth": self.depth(),
        });
        if self.shared.role.is_lead() {
            let (available, applied) = self.migration_marks();
            stats["bootstrap_completed"] = json!(self.bootstrap_completed());
            stats["empty_database"] = json!(self.is_empty_database());
            stats["latest_available_migration"] = json!(available);
            stats["latest_applied_migration"] = json!(applied);
            stats["query_cache_entries"] = json!(self.query_cache_len());
            stats["children"] = json!(children);
        }
        stats
    }

    /// Stop this queue and (for leads) every spawned worker queue. Joins
    /// the threads and closes connections. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.send(QueueCommand::Shutdown);

        if let Ok(mut children) = self.shared.children.lock() {
            for child in children.drain(..) {
                child.shutdown();
            }
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
        if let Ok(mut heartbeat) = self.heartbeat.lock() {
            if let Some(handle) = heartbeat.take() {
                let _ = handle.join();
            }
        }
        info!("{} queue stopped", self.shared.designator);
    }
}

impl Drop for DatabaseQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Worker thread ──────────────────────────────────────────────────────

fn worker_loop(shared: Arc<QueueShared>, receiver: Receiver<QueueCommand>) {
    if shared.role.is_lead() {
        run_conductor(&shared);
    }

    loop {
        match receiver.recv_timeout(WORKER_POLL_INTERVAL) {
            Ok(QueueCommand::Execute(request)) => process_query(&shared, request),
            Ok(QueueCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
        }
    }

    if let Ok(mut connection) = shared.connection.lock() {
        connection.take();
    }
    shared.is_connected.store(false, Ordering::Release);
    debug!("{} worker loop exited", shared.designator);
}

/// Lead startup sequence: connect, bootstrap, migrate, re-bootstrap,
/// spawn workers. Bootstrap completion is signaled on every path so
/// startup waiters never hang.
fn run_conductor(shared: &Arc<QueueShared>) {
    let designator = &shared.designator;
    debug!("{designator} establishing database connection");

    let connected = establish_connection(shared);
    signal_initial_connection(shared);

    if !connected {
        warn!("{designator} initial connection attempt failed; heartbeat will retry");
        signal_bootstrap(shared);
        return;
    }

    run_bootstrap(shared);

    if shared.config.effective_test_migration() {
        match &shared.migrations {
            Some(ctx) => {
                let applied = execute_migrations(shared, ctx);
                if applied > 0 {
                    // Refresh the high-water marks so applied converges
                    // toward available without waiting for the next
                    // natural bootstrap.
                    run_bootstrap(shared);
                }
            }
            None => debug!("{designator} migrations enabled but no migration context supplied"),
        }
    }

    spawn_child_queues(shared);
    info!("{designator} lead initialization complete for {}", shared.config.name);
}

fn establish_connection(shared: &Arc<QueueShared>) -> bool {
    let kind = match shared.config.engine_kind() {
        Ok(kind) => kind,
        Err(e) => {
            error!("{} configuration invalid: {e}", shared.designator);
            return false;
        }
    };
    let masked = connstring::mask_connection_string(&connstring::build_connection_string(
        kind,
        &shared.config,
    ));
    debug!("{} attempting database connection to: {masked}", shared.designator);

    match shared.registry.open_connection(&shared.config, &shared.designator) {
        Ok(mut handle) => match handle.health_check() {
            Ok(()) => {
                debug!("{} database connection established", shared.designator);
                if let Ok(mut guard) = shared.connection.lock() {
                    *guard = Some(handle);
                }
                shared.is_connected.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                error!(
                    "{} health check failed after connect to {masked}: {e}",
                    shared.designator
                );
                false
            }
        },
        Err(e) => {
            error!("{} connection failed for {masked}: {e}", shared.designator);
            false
        }
    }
}

fn signal_initial_connection(shared: &Arc<QueueShared>) {
    if let Ok(mut attempted) = shared.initial_connection.lock() {
        *attempted = true;
        shared.initial_connection_cond.notify_all();
    }
}

fn signal_bootstrap(shared: &Arc<QueueShared>) {
    if let Ok(mut state) = shared.bootstrap.lock() {
        state.completed = true;
        shared.bootstrap_cond.notify_all();
    }
}

/// Execute the bootstrap query on the persistent connection and fold its
/// rows into the query cache and migration marks. Signals completion on
/// success and failure alike.
pub(crate) fn run_bootstrap(shared: &Arc<QueueShared>) {
    let designator = &shared.designator;
    let sql = shared
        .config
        .bootstrap_query
        .clone()
        .unwrap_or_else(|| DEFAULT_BOOTSTRAP_QUERY.to_string());
    let request =
        QueryRequest::new("bootstrap_query", sql).with_timeout(BOOTSTRAP_TIMEOUT_SECS);

    let outcome = {
        let Ok(mut guard) = shared.connection.lock() else {
            error!("{designator} connection lock poisoned during bootstrap");
            signal_bootstrap(shared);
            return;
        };
        match guard.as_mut() {
            Some(handle) => handle.execute(&request, &[]),
            None => {
                warn!("{designator} no persistent connection available for bootstrap query");
                signal_bootstrap(shared);
                return;
            }
        }
    };

    match outcome {
        Ok(result) if result.success => {
            let rows = result.rows_as_json();
            let processed = process_bootstrap_rows(&rows);
            debug!(
                "{designator} bootstrap query returned {} rows, {} cache entries",
                result.row_count,
                processed.cache.len()
            );
            if let Ok(mut cache) = shared.query_cache.write() {
                *cache = processed.cache;
            }
            if let Ok(mut state) = shared.bootstrap.lock() {
                state.empty_database = processed.empty_database;
                state.latest_available_migration = state
                    .latest_available_migration
                    .max(processed.latest_available_migration);
                state.latest_applied_migration = state
                    .latest_applied_migration
                    .max(processed.latest_applied_migration);
                debug!(
                    "{designator} migration marks: available={}, applied={}",
                    state.latest_available_migration, state.latest_applied_migration
                );
            }
        }
        Ok(result) => {
            error!(
                "{designator} bootstrap query failed: {}",
                result
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Err(e) => error!("{designator} bootstrap query failed: {e}"),
    }

    signal_bootstrap(shared);
}

fn execute_migrations(shared: &Arc<QueueShared>, ctx: &Arc<MigrationContext>) -> usize {
    let designator = &shared.designator;
    let Ok(mut guard) = shared.connection.lock() else {
        error!("{designator} connection lock poisoned before migrations");
        return 0;
    };
    let Some(handle) = guard.as_mut() else {
        error!("{designator} no persistent connection available for migrations");
        return 0;
    };
    match run_migrations(&shared.config, ctx, handle, designator) {
        Ok(applied) => applied,
        Err(e) => {
            error!("{designator} migration run failed: {e}");
            0
        }
    }
}

fn spawn_child_queues(shared: &Arc<QueueShared>) {
    let startup = shared.config.queues;
    if startup.total() == 0 {
        return;
    }
    let Ok(mut children) = shared.children.lock() else {
        return;
    };
    let mut queue_number = 1;
    let classes = [
        (QueueClass::Cache, startup.cache),
        (QueueClass::Fast, startup.fast),
        (QueueClass::Medium, startup.medium),
        (QueueClass::Slow, startup.slow),
    ];
    for (class, count) in classes {
        for _ in 0..count {
            let child = DatabaseQueue::new_worker(
                shared.config.clone(),
                class,
                queue_number,
                Arc::clone(&shared.registry),
                Arc::clone(&shared.pending),
            );
            debug!("{} spawned {} child queue {}", shared.designator, class, child.designator());
            children.push(child);
            queue_number += 1;
        }
    }
}

/// Execute one routed query and hand the result to the pending-result
/// manager. An unmatched query id (waiter already gone) keeps result
/// ownership here, where it is dropped.
fn process_query(shared: &Arc<QueueShared>, request: QueryRequest) {
    let query_id = request.query_id.clone();
    let result = execute_request(shared, &request);
    shared
        .total_queries_processed
        .fetch_add(1, Ordering::Relaxed);

    if let Err(unclaimed) = shared.pending.signal_ready(&query_id, result) {
        debug!(
            "{} result for '{query_id}' had no waiter; discarding",
            shared.designator
        );
        drop(unclaimed);
    }
}

/// Query errors never escape the worker: every failure path folds into a
/// `QueryResult` with `success = false` and an error message.
fn execute_request(shared: &Arc<QueueShared>, request: &QueryRequest) -> QueryResult {
    let Ok(mut guard) = shared.connection.lock() else {
        return QueryResult::failure("connection lock poisoned");
    };

    if guard.is_none() {
        match shared
            .registry
            .open_connection(&shared.config, &shared.designator)
        {
            Ok(handle) => {
                *guard = Some(handle);
                shared.is_connected.store(true, Ordering::Release);
            }
            Err(e) => {
                return QueryResult::failure(format!("not connected: {e}"));
            }
        }
    }
    let handle = guard.as_mut().expect("connection populated above");

    let params = match parse_typed_parameters(&request.parameters_json) {
        Ok(params) => params,
        Err(e) => return QueryResult::failure(format!("parameter error: {e}")),
    };
    let (sql, ordered) =
        match convert_named_to_positional(&request.sql_template, &params, handle.kind()) {
            Ok(converted) => converted,
            Err(e) => return QueryResult::failure(format!("parameter error: {e}")),
        };
    let values: Vec<ParamValue> = ordered.iter().map(|p| p.value.clone()).collect();

    let mut exec_request = request.clone();
    exec_request.sql_template = sql;

    let outcome = handle.execute(&exec_request, &values);
    // An execution failure alone does not destroy the connection; a failed
    // round trip after one does, so the next query opens a fresh one.
    let healthy = match &outcome {
        Err(e) if !matches!(e, EngineError::QueryTimeout { .. }) => {
            handle.health_check().is_ok()
        }
        _ => true,
    };
    if !healthy {
        warn!(
            "{} connection unhealthy after query failure; discarding",
            shared.designator
        );
        guard.take();
        shared.is_connected.store(false, Ordering::Release);
    }

    match outcome {
        Ok(result) => result,
        Err(EngineError::QueryTimeout { seconds }) => QueryResult::timed_out(seconds),
        Err(e) => QueryResult::failure(e.to_string()),
    }
}
