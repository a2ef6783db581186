use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProactiveError {
    #[error(transparent)]
    Store(#[from] nikabot_store::StoreError),
    #[error(transparent)]
    Upstream(#[from] nikabot_upstream::UpstreamError),
    #[error(transparent)]
    Transport(#[from] nikabot_turn::TurnError),
}

impl ProactiveError {
    pub fn code(&self) -> &'static str {
        match self {
            ProactiveError::Store(e) => e.code(),
            ProactiveError::Upstream(e) => e.code(),
            ProactiveError::Transport(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProactiveError>;
