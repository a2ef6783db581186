use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("chat state not found for chat_id={chat_id}")]
    ChatStateNotFound { chat_id: i64 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::ChatStateNotFound { .. } => "DATABASE_ERROR",
            StoreError::Serialization(_) => "DATABASE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
