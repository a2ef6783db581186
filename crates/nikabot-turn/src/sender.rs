//! The transport contract the turn processor and proactive scheduler send
//! through (§4.10 "Shared transport obligations"). Transport adapters
//! (bot webhook, userbot) each provide one implementation; the core
//! engine never depends on a concrete platform client.

use async_trait::async_trait;

use crate::error::Result;

/// Platform-native typing/chat-action signal, independent of reply content.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Sends `text` to `chat_id`, optionally quoting `reply_to` (a
    /// platform message id). Returns the platform message id of the
    /// sent message when the transport can report one.
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<Option<i64>>;

    /// Issues a single typing/chat-action signal. Callers loop this on
    /// their own cadence (§4.6 step 13) since the platform's typing
    /// status expires after a few seconds.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;
}
