//! Migration pipeline errors. Each variant names the failing file where
//! one is known; a failed file fails the batch (fail-fast).

use super::engine_error::EngineError;
use super::error_code::{self, SluiceErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration configuration invalid: {message}")]
    Config { message: String },

    #[error("migration discovery failed: {message}")]
    Discovery { message: String },

    #[error("migration script '{file}' failed: {message}")]
    Script { file: String, message: String },

    #[error("applying migration '{file}' failed: {message}")]
    Apply { file: String, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SluiceErrorCode for MigrationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.error_code(),
            _ => error_code::MIGRATION_FAILED,
        }
    }
}
