use thiserror::Error;

use thornwall_common::QueueStatus;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No matching row. Iteration-fatal only: workers sleep briefly and retry.
    #[error("no rows found")]
    NotFound,

    #[error("subject {0} is already queued")]
    AlreadyQueued(u64),

    #[error("invalid queue status transition from {from:?} to {to:?}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("kv error: {0}")]
    Kv(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("comment is too similar to an existing comment")]
    CommentTooSimilar,

    #[error("comment contains invalid links")]
    CommentInvalidLinks,

    #[error("comment already exists")]
    CommentExists,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Kv(err.to_string())
    }
}
