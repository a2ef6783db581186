//! Telegram transport adapter (C10, §4.10): the webhook-driven bot
//! variant and the long-polling userbot variant, sharing one chunked
//! send/escape layer, one per-chat quoting ring, and one media-rehosting
//! path into every downstream turn-coordination component.

pub mod bot_adapter;
pub mod error;
pub mod media;
pub mod recovery;
pub mod ring;
pub mod send;
pub mod userbot_adapter;

pub use bot_adapter::BotAdapter;
pub use error::{Result, TelegramError};
pub use ring::QuoteRing;
pub use send::TelegramSender;
