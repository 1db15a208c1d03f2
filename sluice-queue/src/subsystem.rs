//! The database subsystem: the explicitly constructed context object that
//! owns the engine registry, pending-result manager, and queue manager.
//! Lifecycle is an explicit `init`/`shutdown` bracket around the process
//! run; there is no lazily-initialized global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use sluice_core::config::SluiceConfig;
use sluice_core::errors::QueueError;
use sluice_core::types::{QueryRequest, QueryResult};
use sluice_engines::EngineRegistry;
use sluice_migrate::MigrationContext;

use crate::manager::QueueManager;
use crate::pending::PendingResultManager;

/// Fixed timeout for the synchronous cached-query path.
const CACHED_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DatabaseSubsystem {
    registry: Arc<EngineRegistry>,
    pending: Arc<PendingResultManager>,
    manager: QueueManager,
    started_at: Instant,
    query_counter: AtomicU64,
}

impl DatabaseSubsystem {
    /// Initialize with the built-in engine registry and no migration
    /// context.
    pub fn init(config: SluiceConfig) -> Self {
        Self::init_with(config, Arc::new(EngineRegistry::with_builtin_engines()), None)
    }

    /// Initialize the subsystem: validate each database block and start
    /// its lead queue. A configuration error fails that single database,
    /// never the whole subsystem.
    pub fn init_with(
        config: SluiceConfig,
        registry: Arc<EngineRegistry>,
        migrations: Option<Arc<MigrationContext>>,
    ) -> Self {
        let subsystem = Self {
            registry: Arc::clone(&registry),
            pending: Arc::new(PendingResultManager::new()),
            manager: QueueManager::new(config.effective_max_databases()),
            started_at: Instant::now(),
            query_counter: AtomicU64::new(0),
        };

        for database in &config.databases {
            if let Err(e) = database.validate() {
                error!("database '{}' skipped: {e}", database.name);
                continue;
            }
            if let Err(e) = subsystem.manager.add_database(
                database.clone(),
                Arc::clone(&registry),
                Arc::clone(&subsystem.pending),
                migrations.clone(),
            ) {
                error!("database '{}' failed to start: {e}", database.name);
            }
        }
        subsystem
    }

    pub fn manager(&self) -> &QueueManager {
        &self.manager
    }

    pub fn pending(&self) -> &Arc<PendingResultManager> {
        &self.pending
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Execute a bootstrap-cached query synchronously: look up the
    /// template by reference, merge connection-level default parameters
    /// under the call-supplied ones (call-supplied wins), submit to the
    /// routed queue, and block on the pending result with a fixed
    /// 30-second timeout. Returns None on any failure, with the reason
    /// logged; no internal error codes cross this boundary.
    pub fn execute_cached_query(
        &self,
        database: &str,
        query_ref: i64,
        params: &Value,
    ) -> Option<QueryResult> {
        let queue = match self.manager.get(database) {
            Some(queue) => queue,
            None => {
                error!("database queue not found: {database}");
                return None;
            }
        };
        let entry = match queue.lookup_query(query_ref) {
            Some(entry) => entry,
            None => {
                error!("query_ref {query_ref} not found in cache for database {database}");
                return None;
            }
        };

        let defaults = queue_default_params(&queue);
        let merged = merge_typed_params(defaults.as_ref(), params);

        let sequence = self.query_counter.fetch_add(1, Ordering::Relaxed);
        let query_id = format!("q-{database}-{query_ref}-{sequence}");

        let pending = match self.pending.register(&query_id, CACHED_QUERY_TIMEOUT) {
            Ok(pending) => pending,
            Err(e) => {
                error!("failed to register pending result: {e}");
                return None;
            }
        };

        let request = QueryRequest::new(query_id.clone(), entry.sql_template.clone())
            .with_parameters(merged.to_string())
            .with_timeout(entry.timeout_seconds);

        if let Err(e) = queue.submit_routed(entry.queue_type, request) {
            error!("failed to submit query '{query_id}': {e}");
            return None;
        }

        match pending.wait() {
            Ok(result) => Some(result),
            Err(QueueError::PendingTimeout { .. }) => {
                warn!("query '{query_id}' timed out after {}s", CACHED_QUERY_TIMEOUT.as_secs());
                None
            }
            Err(e) => {
                error!("query '{query_id}' wait failed: {e}");
                None
            }
        }
    }

    /// Execute an ad-hoc query synchronously, routed by a caller-supplied
    /// class hint (the fallback when no cached template is involved).
    /// Waits up to the request's own timeout plus scheduling slack.
    pub fn execute_query(
        &self,
        database: &str,
        mut request: QueryRequest,
        queue_hint: Option<&str>,
    ) -> Option<QueryResult> {
        let queue = match self.manager.get(database) {
            Some(queue) => queue,
            None => {
                error!("database queue not found: {database}");
                return None;
            }
        };
        if request.query_id.is_empty() {
            let sequence = self.query_counter.fetch_add(1, Ordering::Relaxed);
            request.query_id = format!("q-{database}-adhoc-{sequence}");
        }

        let wait = Duration::from_secs(u64::from(request.timeout_seconds) + 5);
        let pending = match self.pending.register(&request.query_id, wait) {
            Ok(pending) => pending,
            Err(e) => {
                error!("failed to register pending result: {e}");
                return None;
            }
        };
        let class = sluice_core::types::QueueClass::from_hint(queue_hint);
        if let Err(e) = queue.submit_routed(class, request) {
            error!("failed to submit query: {e}");
            return None;
        }
        match pending.wait() {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("ad-hoc query wait failed: {e}");
                None
            }
        }
    }

    /// Subsystem health: every lead queue connected (or nothing managed).
    pub fn health_check(&self) -> bool {
        self.manager.health_check()
    }

    /// Engines available through the registry, in reporting order.
    pub fn supported_engines(&self) -> Vec<&'static str> {
        self.registry.supported_engines()
    }

    /// Operational statistics as a JSON document.
    pub fn stats(&self) -> Value {
        json!({
            "uptime_secs": self.started_at.elapsed().as_secs(),
            "engines": self.supported_engines(),
            "pending_results": self.pending.pending_count(),
            "databases": self.manager.stats(),
        })
    }

    /// Stop every queue and release connections. The subsystem is not
    /// usable afterwards.
    pub fn shutdown(&self) {
        debug!("database subsystem shutting down");
        self.manager.shutdown_all();
    }
}

impl Drop for DatabaseSubsystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn queue_default_params(queue: &crate::queue::DatabaseQueue) -> Option<Value> {
    queue.default_params().cloned()
}

/// Merge typed-parameter objects bucket by bucket. Defaults seed the
/// result; call-supplied values override same-type, same-name entries.
pub fn merge_typed_params(defaults: Option<&Value>, supplied: &Value) -> Value {
    let mut merged: Map<String, Value> = defaults
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(buckets) = supplied.as_object() {
        for (type_name, bucket) in buckets {
            let Some(bucket) = bucket.as_object() else {
                continue;
            };
            let target = merged
                .entry(type_name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(target) = target {
                for (name, value) in bucket {
                    target.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Value::Object(merged)
}
