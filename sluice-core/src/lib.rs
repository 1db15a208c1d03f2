//! # sluice-core
//!
//! Foundation crate for the Sluice database access layer.
//! Defines the engine trait seam, typed parameters, SQL rewriting,
//! connection-string handling, errors, and configuration.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod connstring;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod params;
pub mod types;

// Re-export the most commonly used items at the crate root.
pub use config::{DatabaseConfig, QueueStartup, SluiceConfig};
pub use engine::{DatabaseEngine, EngineConnection};
pub use errors::error_code::SluiceErrorCode;
pub use errors::{ConfigError, EngineError, MigrationError, ParamError, QueueError};
pub use params::{ParamType, ParamValue, ParameterList, TypedParameter};
pub use types::{EngineKind, IsolationLevel, QueryRequest, QueryResult, QueueClass, Transaction};

/// Collections keyed by small integers or interned strings use FxHash
/// throughout the workspace.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
