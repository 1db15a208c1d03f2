//! Engine and connection errors.

use super::error_code::{self, SluiceErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine's interface is not registered or its native client
    /// library could not be loaded. Recoverable: the caller reports the
    /// engine unavailable rather than aborting the subsystem.
    #[error("engine '{engine}' unavailable: {reason}")]
    Unavailable { engine: String, reason: String },

    #[error("connect failed: {message}")]
    Connect { message: String },

    #[error("query execution failed: {message}")]
    Execute { message: String },

    #[error("query exceeded {seconds}s timeout")]
    QueryTimeout { seconds: u32 },

    #[error("a transaction is already active on this connection")]
    TransactionActive,

    #[error("no active transaction on this connection")]
    NoTransaction,

    #[error("prepare failed for statement '{name}': {message}")]
    Prepare { name: String, message: String },
}

impl SluiceErrorCode for EngineError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => error_code::ENGINE_UNAVAILABLE,
            Self::Connect { .. } => error_code::CONNECTION_FAILED,
            Self::QueryTimeout { .. } => error_code::QUERY_TIMEOUT,
            Self::TransactionActive | Self::NoTransaction => error_code::TRANSACTION_STATE,
            _ => error_code::QUERY_FAILED,
        }
    }
}
