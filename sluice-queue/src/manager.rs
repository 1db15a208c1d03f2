//! The queue manager: one lead queue per logical database.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use sluice_core::config::DatabaseConfig;
use sluice_core::errors::QueueError;
use sluice_core::types::{QueryRequest, QueueClass};
use sluice_core::FxHashMap;
use sluice_engines::EngineRegistry;
use sluice_migrate::MigrationContext;

use crate::pending::PendingResultManager;
use crate::queue::DatabaseQueue;

pub struct QueueManager {
    databases: std::sync::Mutex<FxHashMap<String, Arc<DatabaseQueue>>>,
    max_databases: usize,
}

impl QueueManager {
    pub fn new(max_databases: usize) -> Self {
        Self {
            databases: std::sync::Mutex::new(FxHashMap::default()),
            max_databases: max_databases.max(1),
        }
    }

    /// Create and start the lead queue for a database. The config is
    /// assumed validated; a duplicate name or a full manager is rejected.
    pub fn add_database(
        &self,
        config: DatabaseConfig,
        registry: Arc<EngineRegistry>,
        pending: Arc<PendingResultManager>,
        migrations: Option<Arc<MigrationContext>>,
    ) -> Result<Arc<DatabaseQueue>, QueueError> {
        let name = config.name.clone();
        let mut databases = self
            .databases
            .lock()
            .map_err(|_| QueueError::ShuttingDown)?;
        if databases.contains_key(&name) {
            return Err(QueueError::DatabaseExists { name });
        }
        if databases.len() >= self.max_databases {
            warn!("queue manager full ({} databases); rejecting '{name}'", databases.len());
            return Err(QueueError::DatabaseExists { name });
        }

        let queue = Arc::new(DatabaseQueue::new_lead(
            config, registry, pending, migrations,
        ));
        info!("started lead queue {} for database '{name}'", queue.designator());
        databases.insert(name, Arc::clone(&queue));
        Ok(queue)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DatabaseQueue>> {
        self.databases.lock().ok()?.get(name).cloned()
    }

    pub fn database_count(&self) -> usize {
        self.databases.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Submit a request to the named database, routed by class hint.
    pub fn submit(
        &self,
        database: &str,
        class: QueueClass,
        request: QueryRequest,
    ) -> Result<(), QueueError> {
        let queue = self.get(database).ok_or_else(|| QueueError::UnknownDatabase {
            name: database.to_string(),
        })?;
        queue.submit_routed(class, request)
    }

    /// Remove a database, stopping its queues. Returns false when absent.
    pub fn remove(&self, name: &str) -> bool {
        let queue = {
            let Ok(mut databases) = self.databases.lock() else {
                return false;
            };
            databases.remove(name)
        };
        match queue {
            Some(queue) => {
                queue.shutdown();
                true
            }
            None => false,
        }
    }

    /// True when every managed lead queue has a live connection. An empty
    /// manager is healthy.
    pub fn health_check(&self) -> bool {
        let Ok(databases) = self.databases.lock() else {
            return false;
        };
        databases
            .values()
            .all(|q| q.is_connected() && !q.is_shutdown())
    }

    pub fn stats(&self) -> Value {
        let Ok(databases) = self.databases.lock() else {
            return Value::Array(Vec::new());
        };
        let mut queues: Vec<&Arc<DatabaseQueue>> = databases.values().collect();
        queues.sort_by(|a, b| a.database_name().cmp(b.database_name()));
        Value::Array(queues.into_iter().map(|q| q.stats()).collect())
    }

    /// Stop every queue. Called from subsystem shutdown.
    pub fn shutdown_all(&self) {
        let queues: Vec<Arc<DatabaseQueue>> = {
            let Ok(mut databases) = self.databases.lock() else {
                return;
            };
            databases.drain().map(|(_, q)| q).collect()
        };
        for queue in queues {
            queue.shutdown();
        }
    }
}
