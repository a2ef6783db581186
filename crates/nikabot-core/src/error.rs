use thiserror::Error;

/// Shared top-level error taxonomy (spec §7). Crates downstream of
/// `nikabot-core` define their own narrower error enums and convert into
/// this one at the boundary where it's user/operator-facing (HTTP
/// responses, task-queue failure rows).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("upstream server error: {0}")]
    UpstreamServer(String),
    #[error("upstream client error: {0}")]
    UpstreamClient(String),
    #[error("upstream other error: {0}")]
    UpstreamOther(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transport send error: {0}")]
    TransportSend(String),
}

impl CoreError {
    /// Short uppercase code, written into `Event` rows and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Database(_) => "DATABASE_ERROR",
            CoreError::UpstreamServer(_) => "UPSTREAM_SERVER_ERROR",
            CoreError::UpstreamClient(_) => "UPSTREAM_CLIENT_ERROR",
            CoreError::UpstreamOther(_) => "UPSTREAM_OTHER_ERROR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::TransportSend(_) => "TRANSPORT_SEND_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
