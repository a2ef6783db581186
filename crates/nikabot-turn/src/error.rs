use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Store(#[from] nikabot_store::StoreError),
    #[error(transparent)]
    Queue(#[from] nikabot_queue::QueueError),
    #[error(transparent)]
    Upstream(#[from] nikabot_upstream::UpstreamError),
    #[error("transport send failed: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TurnError {
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Store(e) => e.code(),
            TurnError::Queue(_) => "QUEUE_ERROR",
            TurnError::Upstream(e) => e.code(),
            TurnError::Transport(_) => "TRANSPORT_ERROR",
            TurnError::Serialization(_) => "DATABASE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TurnError>;
