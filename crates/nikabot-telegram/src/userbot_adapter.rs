//! Long-polling transport variant (§4.10 B).
//!
//! Named "userbot" after the spec it honours — a second, independent
//! ingress, distinct from the webhook-driven bot — but implemented as a
//! second teloxide long-polling `Bot` dispatcher authenticated with its
//! own bot token rather than a true MTProto user session. See DESIGN.md
//! for why: no MTProto client exists anywhere in this codebase's
//! dependency corpus, and fabricating one to satisfy the letter of "API
//! credentials + session string" would be worse than documenting the
//! substitution.
//!
//! Structurally this mirrors the teacher's `adapter.rs`: a `Bot` +
//! `Dispatcher` pair driving `Update::filter_message()` until the process
//! exits, reconnecting automatically on transport errors.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use nikabot_core::storage::FileStore;
use nikabot_turn::{Command, DebounceBuffer, InboundEvent, TurnInput, TurnProcessor};

use crate::media::extract_media;
use crate::send::TelegramSender;

#[derive(Clone)]
struct UserbotDeps {
    buffer: Arc<DebounceBuffer<TurnProcessor>>,
    processor: Arc<TurnProcessor>,
    files: Arc<FileStore>,
    sender: Arc<TelegramSender>,
    max_attachment_bytes: u64,
}

/// Drives the userbot long-polling event loop. Never returns.
pub async fn run(
    bot_token: &str,
    buffer: Arc<DebounceBuffer<TurnProcessor>>,
    processor: Arc<TurnProcessor>,
    files: Arc<FileStore>,
    sender: Arc<TelegramSender>,
    max_attachment_bytes: u64,
) {
    let bot = Bot::new(bot_token);
    let deps = UserbotDeps {
        buffer,
        processor,
        files,
        sender,
        max_attachment_bytes,
    };

    info!("userbot: starting long-polling dispatcher");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .default_handler(|_upd| async {})
        .build()
        .dispatch()
        .await;
}

async fn handle_message(bot: Bot, msg: Message, deps: UserbotDeps) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };

    if !is_for_me(&bot, &msg).await {
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    let chat_type = chat_type_label(&msg);
    let user_id = Some(from.id.0 as i64);
    let username = from.username.clone();
    let lang = from.language_code.clone();
    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let platform_msg_id = msg.id.0 as i64;

    deps.sender.record_user_message(chat_id, platform_msg_id);

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
        if let Err(e) = deps.processor.process_turn(input).await {
            tracing::warn!(chat_id, error = %e, "userbot: command processing failed");
        }
        return Ok(());
    }

    let media = extract_media(&bot, &msg, &deps.files, deps.max_attachment_bytes).await;
    let has_media =
        media.is_some() || msg.document().is_some() || msg.voice().is_some() || msg.audio().is_some();

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

    if let Err(e) = deps.buffer.append(event).await {
        tracing::warn!(chat_id, error = %e, "userbot: buffer append failed");
    }

    Ok(())
}

/// "For-me" filter (§4.10 B): always true in private chats; in groups
/// only when the bot is @mentioned or the message replies to one of the
/// bot's own messages.
async fn is_for_me(bot: &Bot, msg: &Message) -> bool {
    if msg.chat.is_private() {
        return true;
    }

    if let Some(reply) = msg.reply_to_message() {
        if reply.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
            return true;
        }
    }

    let bot_username = match bot.get_me().await {
        Ok(me) => me.user.username.clone().unwrap_or_default(),
        Err(_) => return false,
    };
    if bot_username.is_empty() {
        return false;
    }
    let text = msg.text().or(msg.caption()).unwrap_or("");
    text.contains(&format!("@{bot_username}"))
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
