//! Engine registry: one interface per engine kind, built explicitly during
//! subsystem init and shared by `Arc`. No lazy process globals.

use std::sync::Arc;

use tracing::debug;

use sluice_core::config::DatabaseConfig;
use sluice_core::errors::EngineError;
use sluice_core::types::EngineKind;
use sluice_core::DatabaseEngine;

use crate::connection::DatabaseHandle;
use crate::db2::Db2Engine;
use crate::mysql_engine::MysqlEngine;
use crate::postgres_engine::PostgresEngine;
use crate::sqlite::SqliteEngine;

pub struct EngineRegistry {
    engines: [Option<Arc<dyn DatabaseEngine>>; 4],
}

fn slot(kind: EngineKind) -> usize {
    match kind {
        EngineKind::Postgres => 0,
        EngineKind::Mysql => 1,
        EngineKind::Sqlite => 2,
        EngineKind::Db2 => 3,
    }
}

impl EngineRegistry {
    /// An empty registry. Mostly useful for tests that register stubs.
    pub fn new() -> Self {
        Self {
            engines: [None, None, None, None],
        }
    }

    /// The production registry with all four built-in engines.
    pub fn with_builtin_engines() -> Self {
        let mut registry = Self::new();
        for engine in [
            Arc::new(PostgresEngine) as Arc<dyn DatabaseEngine>,
            Arc::new(MysqlEngine) as Arc<dyn DatabaseEngine>,
            Arc::new(SqliteEngine) as Arc<dyn DatabaseEngine>,
            Arc::new(Db2Engine) as Arc<dyn DatabaseEngine>,
        ] {
            // Built-in registration cannot conflict.
            let name = engine.name();
            if registry.register(engine).is_ok() {
                debug!("registered database engine: {name}");
            }
        }
        registry
    }

    /// Register an engine interface. An empty name or an occupied slot is
    /// a misconfiguration reported to the caller.
    pub fn register(&mut self, engine: Arc<dyn DatabaseEngine>) -> Result<(), EngineError> {
        if engine.name().is_empty() {
            return Err(EngineError::Unavailable {
                engine: engine.kind().as_str().to_string(),
                reason: "engine interface has an empty name".to_string(),
            });
        }
        let slot = &mut self.engines[slot(engine.kind())];
        if slot.is_some() {
            return Err(EngineError::Unavailable {
                engine: engine.name().to_string(),
                reason: "engine already registered".to_string(),
            });
        }
        *slot = Some(engine);
        Ok(())
    }

    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn DatabaseEngine>, EngineError> {
        self.engines[slot(kind)]
            .clone()
            .ok_or_else(|| EngineError::Unavailable {
                engine: kind.as_str().to_string(),
                reason: "no interface registered".to_string(),
            })
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn DatabaseEngine>, EngineError> {
        let kind = EngineKind::from_name(name).ok_or_else(|| EngineError::Unavailable {
            engine: name.to_string(),
            reason: "unknown engine name".to_string(),
        })?;
        self.get(kind)
    }

    /// Display names of registered engines, in reporting order.
    pub fn supported_engines(&self) -> Vec<&'static str> {
        EngineKind::ALL
            .into_iter()
            .filter(|k| self.engines[slot(*k)].is_some())
            .map(|k| k.display_name())
            .collect()
    }

    /// Open a connection for a database config, wrapping it in a
    /// `DatabaseHandle` with the configured prepared-statement capacity.
    pub fn open_connection(
        &self,
        config: &DatabaseConfig,
        designator: &str,
    ) -> Result<DatabaseHandle, EngineError> {
        let kind = config.engine_kind().map_err(|e| EngineError::Connect {
            message: e.to_string(),
        })?;
        let engine = self.get(kind)?;
        let inner = engine.connect(config, designator)?;
        Ok(DatabaseHandle::new(
            kind,
            designator,
            inner,
            config.effective_prepared_cache_capacity(),
        ))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_builtin_engines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_engine_is_unavailable_not_a_panic() {
        let registry = EngineRegistry::new();
        let err = registry.get(EngineKind::Postgres).unwrap_err();
        assert!(matches!(err, EngineError::Unavailable { .. }));
    }

    #[test]
    fn builtin_registry_reports_all_engines() {
        let registry = EngineRegistry::with_builtin_engines();
        assert_eq!(
            registry.supported_engines(),
            vec!["PostgreSQL", "SQLite", "MySQL", "DB2"]
        );
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = EngineRegistry::with_builtin_engines();
        let err = registry.register(Arc::new(SqliteEngine)).unwrap_err();
        assert!(matches!(err, EngineError::Unavailable { .. }));
    }
}
