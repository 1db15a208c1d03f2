//! Subsystem configuration: one block per logical database.

use serde::{Deserialize, Serialize};

use crate::connstring;
use crate::errors::ConfigError;
use crate::types::EngineKind;

/// How many worker queues of each class a lead queue spawns at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct QueueStartup {
    pub slow: usize,
    pub medium: usize,
    pub fast: usize,
    pub cache: usize,
}

impl QueueStartup {
    pub fn total(&self) -> usize {
        self.slow + self.medium + self.fast + self.cache
    }
}

/// Per-database connection descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Logical database name, unique within the subsystem.
    pub name: String,
    /// Engine name ("postgresql", "mysql", "sqlite", "db2"). When absent,
    /// the engine is inferred from the connection string.
    pub engine: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub database: Option<String>,
    /// Pre-built connection string; takes precedence over the structured
    /// fields above.
    pub connection_string: Option<String>,
    pub schema: Option<String>,
    /// Migrations source: `PAYLOAD:<name>` or a filesystem directory.
    pub migrations: Option<String>,
    pub test_migration: Option<bool>,
    /// Bootstrap query the lead queue runs after connecting.
    pub bootstrap_query: Option<String>,
    /// Connection-level default typed parameters, merged under
    /// call-supplied parameters (call-supplied wins on conflict).
    pub default_params: Option<serde_json::Value>,
    pub prepared_cache_capacity: Option<usize>,
    pub heartbeat_interval_secs: Option<u64>,
    pub default_query_timeout_secs: Option<u32>,
    pub queues: QueueStartup,
}

impl DatabaseConfig {
    /// Returns the effective prepared-statement cache capacity, defaulting to 1000.
    pub fn effective_prepared_cache_capacity(&self) -> usize {
        self.prepared_cache_capacity.unwrap_or(1000).max(1)
    }

    /// Returns the effective heartbeat interval, defaulting to 30 seconds.
    pub fn effective_heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval_secs.unwrap_or(30).max(1)
    }

    /// Returns the effective per-query timeout, defaulting to 30 seconds.
    pub fn effective_query_timeout_secs(&self) -> u32 {
        self.default_query_timeout_secs.unwrap_or(30).max(1)
    }

    /// Returns whether migration execution is enabled, defaulting to false.
    pub fn effective_test_migration(&self) -> bool {
        self.test_migration.unwrap_or(false)
    }

    pub fn effective_schema(&self) -> &str {
        self.schema.as_deref().unwrap_or("")
    }

    /// Resolve the engine for this database: explicit name first, otherwise
    /// inferred from the connection string (absent string ⇒ SQLite).
    pub fn engine_kind(&self) -> Result<EngineKind, ConfigError> {
        if let Some(name) = &self.engine {
            return EngineKind::from_name(name).ok_or_else(|| ConfigError::InvalidEngine {
                value: name.clone(),
            });
        }
        Ok(connstring::infer_engine(self.connection_string.as_deref()))
    }

    /// Validate the block. A failure here aborts this database only, never
    /// the whole subsystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                database: "<unnamed>".to_string(),
                field: "name".to_string(),
            });
        }
        let kind = self.engine_kind()?;
        if self.connection_string.is_none() {
            match kind {
                EngineKind::Sqlite => {
                    if self.database.is_none() {
                        return Err(self.missing("database"));
                    }
                }
                _ => {
                    if self.host.is_none() {
                        return Err(self.missing("host"));
                    }
                    if self.database.is_none() {
                        return Err(self.missing("database"));
                    }
                }
            }
        }
        if let Some(migrations) = &self.migrations {
            validate_migration_source(migrations)?;
        }
        Ok(())
    }

    fn missing(&self, field: &str) -> ConfigError {
        ConfigError::MissingField {
            database: self.name.clone(),
            field: field.to_string(),
        }
    }
}

/// Reject obviously broken migration sources early: empty payload names and
/// empty or root-like filesystem paths.
pub fn validate_migration_source(value: &str) -> Result<(), ConfigError> {
    if let Some(payload) = value.strip_prefix("PAYLOAD:") {
        if payload.is_empty() {
            return Err(ConfigError::InvalidMigrationSource {
                value: value.to_string(),
                reason: "empty payload name".to_string(),
            });
        }
        return Ok(());
    }
    let trimmed = value.trim_end_matches('/');
    if value.is_empty() || trimmed.is_empty() {
        return Err(ConfigError::InvalidMigrationSource {
            value: value.to_string(),
            reason: "path resolves to filesystem root".to_string(),
        });
    }
    Ok(())
}

/// Top-level subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SluiceConfig {
    pub databases: Vec<DatabaseConfig>,
    /// Upper bound on managed databases. Default: 16.
    pub max_databases: Option<usize>,
}

impl SluiceConfig {
    pub fn effective_max_databases(&self) -> usize {
        self.max_databases.unwrap_or(16)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&text)
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| d.name == name)
    }
}
