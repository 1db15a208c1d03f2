//! Configuration errors. These fail the single affected database only.

use super::error_code::{self, SluiceErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("database '{database}' is missing required field '{field}'")]
    MissingField { database: String, field: String },

    #[error("unknown engine '{value}'")]
    InvalidEngine { value: String },

    #[error("invalid migration source '{value}': {reason}")]
    InvalidMigrationSource { value: String, reason: String },

    #[error("failed to parse configuration: {message}")]
    Parse { message: String },
}

impl SluiceErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        error_code::CONFIG_INVALID
    }
}
