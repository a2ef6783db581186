//! Webhook-driven transport variant (§4.10 A).
//!
//! The HTTP endpoint itself — `/tg/webhook?secret=...`, including the
//! 403-on-mismatch secret check — lives in the gateway binary, which owns
//! ingress for this variant. This module is the part of the contract that
//! belongs to the Telegram crate: decoding a platform `Update` into an
//! [`InboundEvent`] and routing it to either the Debounce Buffer or the
//! Turn Processor directly, exactly as the teacher's `handler.rs` routes
//! into its LLM pipeline.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::UpdateKind;
use tracing::warn;

use nikabot_core::storage::FileStore;
use nikabot_turn::{Command, DebounceBuffer, InboundEvent, TurnInput, TurnProcessor};

use crate::error::Result;
use crate::media::extract_media;
use crate::send::TelegramSender;

/// Everything the webhook ingress path needs to turn a raw `Update` into
/// turn-coordination activity.
pub struct BotAdapter {
    bot: Bot,
    buffer: Arc<DebounceBuffer<TurnProcessor>>,
    processor: Arc<TurnProcessor>,
    files: FileStore,
    sender: Arc<TelegramSender>,
    max_attachment_bytes: u64,
}

impl BotAdapter {
    pub fn new(
        bot: Bot,
        buffer: Arc<DebounceBuffer<TurnProcessor>>,
        processor: Arc<TurnProcessor>,
        files: FileStore,
        sender: Arc<TelegramSender>,
        max_attachment_bytes: u64,
    ) -> Self {
        Self {
            bot,
            buffer,
            processor,
            files,
            sender,
            max_attachment_bytes,
        }
    }

    /// Decodes and routes a single `Update` delivered to the webhook.
    pub async fn dispatch_update(&self, update: Update) -> Result<()> {
        if let UpdateKind::Message(msg) = update.kind {
            self.handle_message(msg).await?;
        }
        Ok(())
    }

    async fn handle_message(&self, msg: Message) -> Result<()> {
        if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
            return Ok(());
        }
        let Some(from) = msg.from.as_ref() else {
            return Ok(());
        };

        let chat_id = msg.chat.id.0;
        let chat_type = chat_type_label(&msg);
        let user_id = Some(from.id.0 as i64);
        let username = from.username.clone();
        let lang = from.language_code.clone();
        let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
        let platform_msg_id = msg.id.0 as i64;

        self.sender.record_user_message(chat_id, platform_msg_id);

        // Commands bypass the debounce buffer entirely (§4.10 A).
        if Command::parse(&text).is_some() {
            let input = TurnInput {
                chat_id,
                chat_type,
                user_id,
                username,
                lang,
                text,
                media: None,
                trace_id: None,
                platform_msg_id: Some(platform_msg_id),
            };
            if let Err(e) = self.processor.process_turn(input).await {
                warn!(chat_id, error = %e, "telegram: command processing failed");
            }
            return Ok(());
        }

        let media = extract_media(&self.bot, &msg, &self.files, self.max_attachment_bytes).await;
        let has_media = media.is_some()
            || msg.document().is_some()
            || msg.voice().is_some()
            || msg.audio().is_some()
            || msg.photo().is_some();

        if text.is_empty() && !has_media {
            return Ok(());
        }

        let event = InboundEvent {
            chat_id,
            chat_type,
            user_id,
            username,
            lang,
            text,
            media,
            trace_id: None,
        };

        if let Err(e) = self.buffer.append(event).await {
            warn!(chat_id, error = %e, "telegram: buffer append failed");
        }

        Ok(())
    }
}

fn chat_type_label(msg: &Message) -> String {
    if msg.chat.is_private() {
        "private".to_string()
    } else if msg.chat.is_supergroup() {
        "supergroup".to_string()
    } else if msg.chat.is_group() {
        "group".to_string()
    } else if msg.chat.is_channel() {
        "channel".to_string()
    } else {
        "unknown".to_string()
    }
}
