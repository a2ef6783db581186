use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid completion status: {0}")]
    InvalidStatus(String),
    #[error("task not found: {id}")]
    TaskNotFound { id: i64 },
}

pub type Result<T> = std::result::Result<T, QueueError>;
