//! Queue, routing, and pending-result errors.

use super::engine_error::EngineError;
use super::error_code::{self, SluiceErrorCode};
use super::param_error::ParamError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("no queue registered for database '{name}'")]
    UnknownDatabase { name: String },

    #[error("database '{name}' is already registered")]
    DatabaseExists { name: String },

    #[error("query '{query_id}' is already pending")]
    DuplicateQueryId { query_id: String },

    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("timed out waiting for result of query '{query_id}'")]
    PendingTimeout { query_id: String },

    #[error("wait for query '{query_id}' failed: {message}")]
    PendingFailed { query_id: String, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Param(#[from] ParamError),
}

impl SluiceErrorCode for QueueError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::PendingTimeout { .. } => error_code::PENDING_TIMEOUT,
            Self::Engine(e) => e.error_code(),
            Self::Param(e) => e.error_code(),
            _ => error_code::QUEUE_ERROR,
        }
    }
}
