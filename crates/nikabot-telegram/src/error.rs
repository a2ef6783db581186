use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error(transparent)]
    Teloxide(#[from] teloxide::RequestError),
    #[error(transparent)]
    Store(#[from] nikabot_store::StoreError),
    #[error(transparent)]
    Turn(#[from] nikabot_turn::TurnError),
    #[error("no bot token configured")]
    NoToken,
}

pub type Result<T> = std::result::Result<T, TelegramError>;
