use thiserror::Error;

use crate::types::TaskStatus;

/// Errors that can occur within the queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    /// SQLite-backed cache operation failed.
    #[error("sqlite cache {op} failed: {source}")]
    Sqlite {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Redis-backed cache operation failed.
    #[error("redis cache {op} failed: {source}")]
    Redis {
        op: &'static str,
        #[source]
        source: redis::RedisError,
    },

    /// A task record or envelope could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No task record exists for this ID (never enqueued, or evicted).
    #[error("task not found: {id}")]
    NotFound { id: String },

    /// The requested status change is not allowed from the current status.
    #[error("task {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A handler with this function name is already registered.
    #[error("duplicate task handler: {name}")]
    DuplicateHandler { name: String },
}

impl QueueError {
    pub(crate) fn sqlite(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| QueueError::Sqlite { op, source }
    }

    pub(crate) fn redis(op: &'static str) -> impl FnOnce(redis::RedisError) -> Self {
        move |source| QueueError::Redis { op, source }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
