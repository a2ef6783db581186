//! Outbound message delivery: smart chunking, MarkdownV2-with-fallback,
//! and the per-chat quoting cadence (§4.10), adapted from the teacher's
//! `send_response` to also implement [`nikabot_turn::OutboundSender`].

use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, MessageId, ParseMode, ReplyParameters};
use tracing::warn;

use nikabot_turn::error::{Result, TurnError};
use nikabot_turn::sender::OutboundSender;

use crate::ring::QuoteRing;

const CHUNK_MAX: usize = 4090;

/// Sends `text` to `bot`/`chat_id` in smart-chunked messages, trying
/// MarkdownV2 first and falling back to plain text per chunk on a parse
/// error. Only the first chunk carries `reply_to`, matching how a human
/// quoting a message only quotes once even for a multi-message answer.
pub async fn send_response(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    reply_to: Option<i32>,
) -> std::result::Result<Option<i32>, teloxide::RequestError> {
    let chunks = split_chunks_smart(text);
    let mut first_sent_id = None;
    for (i, chunk) in chunks.iter().enumerate() {
        let escaped = escape_markdown_v2(chunk);
        let mut request = bot.send_message(chat_id, &escaped).parse_mode(ParseMode::MarkdownV2);
        if i == 0 {
            if let Some(reply_id) = reply_to {
                request = request.reply_parameters(ReplyParameters::new(MessageId(reply_id)));
            }
        }
        let sent = request.await;

        let message = match sent {
            Ok(m) => Some(m),
            Err(_) => {
                // MarkdownV2 rejected — fall back to plain text.
                let mut plain = bot.send_message(chat_id, chunk);
                if i == 0 {
                    if let Some(reply_id) = reply_to {
                        plain = plain.reply_parameters(ReplyParameters::new(MessageId(reply_id)));
                    }
                }
                match plain.await {
                    Ok(m) => Some(m),
                    Err(e) => {
                        warn!(error = %e, chunk_index = i, "telegram: failed to send plain-text fallback");
                        None
                    }
                }
            }
        };

        if i == 0 {
            first_sent_id = message.map(|m| m.id.0);
        }

        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(first_sent_id)
}

/// Code-fence-aware message splitter for Telegram's 4096-char limit.
pub fn split_chunks_smart(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in &lines {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };

        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(ref lang) = fence_lang {
                if lang.is_empty() {
                    current.push_str("```\n");
                } else {
                    current.push_str("```");
                    current.push_str(lang);
                    current.push('\n');
                }
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after_fence) = trimmed.strip_prefix("```") {
            if fence_lang.is_some() {
                fence_lang = None;
            } else {
                fence_lang = Some(after_fence.trim().to_string());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
        } else {
            let mut remaining = chunk.as_str();
            while remaining.len() > CHUNK_MAX {
                let split_at = remaining[..CHUNK_MAX]
                    .rfind('\n')
                    .or_else(|| remaining[..CHUNK_MAX].rfind(' '))
                    .unwrap_or(CHUNK_MAX);
                result.push(remaining[..split_at].to_string());
                remaining = remaining[split_at..].trim_start();
            }
            if !remaining.is_empty() {
                result.push(remaining.to_string());
            }
        }
    }

    result
}

/// Escapes MarkdownV2 special characters: `` _ * [ ] ( ) ~ ` # + - = | { } . ! ``
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|' | '{'
            | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// The shared [`OutboundSender`] implementation used by both the
/// webhook-bot and userbot adapters: same [`Bot`] client, same quoting
/// cadence, same chunking/escaping rules.
pub struct TelegramSender {
    bot: Bot,
    quotes: QuoteRing,
}

impl TelegramSender {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            quotes: QuoteRing::new(),
        }
    }

    /// Records a user-authored platform message id for this chat's
    /// quoting ring. Called by the adapter on every inbound event.
    pub fn record_user_message(&self, chat_id: i64, platform_msg_id: i64) {
        self.quotes.record_user_message(chat_id, platform_msg_id);
    }
}

#[async_trait]
impl OutboundSender for TelegramSender {
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<Option<i64>> {
        let quote_id = reply_to
            .map(|id| id as i32)
            .or_else(|| self.quotes.next_reply_to(chat_id).map(|id| id as i32));
        let sent = send_response(&self.bot, ChatId(chat_id), text, quote_id)
            .await
            .map_err(|e| TurnError::Transport(e.to_string()))?;
        Ok(sent.map(|id| id as i64))
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map_err(|e| TurnError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks_smart("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Hello, world!");
    }

    #[test]
    fn exactly_chunk_max_is_single_chunk() {
        let text = "a".repeat(CHUNK_MAX);
        let chunks = split_chunks_smart(&text);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn over_limit_splits_on_newline() {
        let line = "a".repeat(2000);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX, "chunk too large: {}", c.len());
        }
    }

    #[test]
    fn very_long_single_line_force_splits() {
        let text = "x".repeat(9000);
        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn code_fence_language_preserved() {
        let mut text = String::from("```python\n");
        for _ in 0..100 {
            text.push_str("print('hello world this is a reasonably long line of python code')\n");
        }
        text.push_str("```\n");

        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks[1].starts_with("```python"));
    }

    #[test]
    fn escape_markdown_v2_escapes_specials() {
        let input = "Hello. World! (test) [link] ~strike~";
        let escaped = escape_markdown_v2(input);
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\!"));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\)"));
        assert!(escaped.contains("\\["));
        assert!(escaped.contains("\\]"));
        assert!(escaped.contains("\\~"));
    }

    #[test]
    fn escape_markdown_v2_leaves_normal_chars() {
        let input = "Hello world 123 abc";
        assert_eq!(escape_markdown_v2(input), input);
    }
}
