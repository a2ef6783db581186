//! Turn Processor (C6, §4.6): the per-turn pipeline from a normalised
//! inbound message (or a flushed debounce buffer payload) through
//! anti-spam, sleep/quiet gating, the upstream call, moderation, the
//! reply-delay policy, and persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{info, warn};

use nikabot_core::config::NikabotConfig;
use nikabot_core::window::TimeWindow;
use nikabot_core::Metrics;
use nikabot_store::{ChatState, MediaOrigin, PendingMedia, Store};
use nikabot_upstream::{
    ChatInfo, ContextInfo, HistoryEntry, Intent, MessageInfo, UpstreamClient, UpstreamError,
    UpstreamRequest,
};

use crate::buffer::{FlushedTurn, TurnFlusher};
use crate::commands::{self, Command};
use crate::delay::{compute_delay, DelayInputs, MediaDelayOrigin};
use crate::error::{Result, TurnError};
use crate::moderation::should_auto_block;
use crate::sender::OutboundSender;

const GOODNIGHT_KEYWORDS: &[&str] = &[
    "споки",
    "спокойной ночи",
    "сплю",
    "пойду спать",
    "доброй ночи",
];

/// One normalised inbound turn, whether it arrived as a single message
/// or as the aggregated payload of a flushed debounce buffer.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub chat_id: i64,
    pub chat_type: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub lang: Option<String>,
    pub text: String,
    pub media: Option<PendingMedia>,
    pub trace_id: Option<String>,
    pub platform_msg_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A reply was sent (or is being sent in a detached task) with the
    /// given delay classification.
    Replied { delay_kind: &'static str },
    /// The turn produced no send — sleep, anti-spam, or an in-band
    /// command that itself replied synchronously but isn't a "reply".
    Handled(&'static str),
}

pub struct TurnProcessor {
    store: Arc<Store>,
    upstream: Arc<UpstreamClient>,
    metrics: Arc<Metrics>,
    config: Arc<NikabotConfig>,
    sender: Arc<dyn OutboundSender>,
}

impl TurnProcessor {
    pub fn new(
        store: Arc<Store>,
        upstream: Arc<UpstreamClient>,
        metrics: Arc<Metrics>,
        config: Arc<NikabotConfig>,
        sender: Arc<dyn OutboundSender>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            upstream,
            metrics,
            config,
            sender,
        })
    }

    pub async fn process_turn(&self, input: TurnInput) -> Result<TurnOutcome> {
        self.metrics.messages_received_total.inc();

        // 1. Normalise.
        let text = clip(input.text.trim(), self.config.turn.max_user_text_len);

        // 2. Upsert Chat/User/ChatState.
        let mut state = self.store.ensure_entities(
            input.chat_id,
            &input.chat_type,
            input.user_id,
            input.username.as_deref(),
            input.lang.as_deref(),
            self.config.proactive.default_auto_messages,
        )?;

        // 3. Persist UserMessage.
        self.store.save_user_message(
            input.chat_id,
            input.user_id,
            &text,
            input.platform_msg_id,
        )?;

        // 4. Record prev_user_ts, stamp last_user_msg_at.
        let now = Utc::now();
        let prev_user_ts = state.last_user_msg_at;
        state = self.store.update_chat_state(input.chat_id, |s| {
            s.last_user_msg_at = Some(now);
        })?;

        // 5. In-band commands.
        if let Some(cmd) = Command::parse(&text) {
            return self.handle_command(cmd, input.chat_id, &mut state, now).await;
        }

        // 6. Anti-spam.
        if let Some(prev) = prev_user_ts {
            let elapsed = (now - prev).num_seconds();
            let min_gap = self.config.turn.user_min_seconds_between_msg;
            if elapsed < min_gap {
                let wait = min_gap - elapsed;
                self.reply_now(
                    input.chat_id,
                    &format!("Слишком часто, подождите ещё {wait} c"),
                )
                .await?;
                return Ok(TurnOutcome::Handled("anti_spam"));
            }
        }

        // 7. Sleep.
        if let Some(until) = state.sleep_until {
            if until > now {
                return Ok(TurnOutcome::Handled("sleep"));
            }
        }

        // 8. Quiet-hour goodnight handling.
        if let Some(quiet) = self
            .config
            .proactive
            .quiet_window
            .as_deref()
            .and_then(TimeWindow::parse)
        {
            let minute_of_day = local_minute_of_day(now, state.timezone_offset_minutes);
            if quiet.contains(minute_of_day) {
                let wake_at = now + Duration::minutes(quiet.minutes_until_end(minute_of_day) as i64);

                if is_goodnight_text(&text) {
                    return self
                        .goodnight_reply(input.chat_id, &state, Intent::UserGoodnight, wake_at, now)
                        .await;
                }

                if state.last_goodnight_sent_at.is_some()
                    && state.last_goodnight_followup_sent_at.is_none()
                {
                    let outcome = self
                        .goodnight_reply(input.chat_id, &state, Intent::GoodnightFollowup, wake_at, now)
                        .await?;
                    self.store.update_chat_state(input.chat_id, |s| {
                        s.last_goodnight_followup_sent_at = Some(now);
                    })?;
                    return Ok(outcome);
                }
            }
        }

        // 9-10. Build and call upstream.
        let history = self.store.fetch_recent(
            input.chat_id,
            50,
            Some(state.persona_key.as_str()),
            Some(8000),
            4000,
            2000,
        )?;
        let media_origin = media_delay_origin(input.media.as_ref());
        let request = self.build_request(
            Intent::Reply,
            &state,
            input.user_id,
            input.username.as_deref(),
            input.lang.as_deref(),
            history,
            Some(text.as_str()),
            input.media.as_ref(),
            input.trace_id.as_deref(),
        );

        let response = match self.upstream.call(&request, input.trace_id.as_deref()).await {
            Ok(r) => r,
            Err(e) => return self.handle_upstream_error(input.chat_id, e).await,
        };

        // 11. Moderation.
        if response.meta.abuse_flagged() {
            self.store.record_event(
                "abuse_detected",
                Some(input.chat_id),
                input.user_id,
                &serde_json::json!({"suggested_mute_hours": response.meta.suggested_mute_hours()}),
            )?;
            let window_start = now - Duration::minutes(self.config.moderation.abuse_window_minutes);
            let count = self.store.count_events_since(input.chat_id, "abuse_detected", window_start)?;
            if should_auto_block(count, self.config.moderation.abuse_max_in_window) {
                let block_until = now + Duration::hours(self.config.moderation.abuse_auto_block_hours);
                self.store.update_chat_state(input.chat_id, |s| {
                    s.sleep_until = Some(block_until);
                })?;
                self.store.record_event(
                    "abuse_auto_block",
                    Some(input.chat_id),
                    input.user_id,
                    &serde_json::json!({"sleep_until": block_until}),
                )?;
                warn!(chat_id = input.chat_id, "abuse auto-block triggered");
            }
        }

        // 12. Reply-delay policy.
        let decision = compute_delay(
            &self.config.reply_delay,
            &DelayInputs {
                now,
                prev_user_ts,
                last_assistant_at: state.last_assistant_at,
                last_long_pause_reply_at: state.last_long_pause_reply_at,
                media_origin,
            },
        );
        if decision.mark_long_pause {
            self.store.update_chat_state(input.chat_id, |s| {
                s.last_long_pause_reply_at = Some(now);
            })?;
        }

        self.metrics
            .reply_delay_seconds
            .with_label_values(&[decision.kind.as_str()])
            .observe(decision.seconds as f64);

        let meta = serde_json::json!({
            "persona": state.persona_key,
            "delay_kind": decision.kind.as_str(),
            "delay_seconds": decision.seconds,
            "intent": "reply",
            "model": response.meta.model,
            "tokens": response.meta.tokens,
        });

        // 13-14. Send with typing + persist. §4.6 step 13 only allows a
        // detached task once `delay > 30`; at or below that, the turn
        // awaits the send inline so the per-chat serialization a single
        // turn is one transaction for (§5) actually holds and same-chat
        // replies stay ordered (P3).
        if decision.seconds > 30 {
            self.spawn_detached_send(
                input.chat_id,
                response.reply,
                meta,
                decision.seconds,
                state.auto_enabled,
            );
        } else {
            self.send_and_persist_inline(
                input.chat_id,
                response.reply,
                meta,
                decision.seconds,
                state.auto_enabled,
            )
            .await?;
        }

        Ok(TurnOutcome::Replied {
            delay_kind: decision.kind.as_str(),
        })
    }

    async fn handle_command(
        &self,
        cmd: Command,
        chat_id: i64,
        state: &mut ChatState,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome> {
        match cmd {
            Command::Wake => {
                *state = self.store.update_chat_state(chat_id, |s| {
                    s.sleep_until = None;
                })?;
                self.reply_now(chat_id, commands::WAKE_REPLY).await?;
                self.store.update_chat_state(chat_id, |s| {
                    s.last_assistant_at = Some(now);
                })?;
                Ok(TurnOutcome::Handled("command_wake"))
            }
            Command::Reset => {
                *state = self.store.update_chat_state(chat_id, |s| {
                    s.sleep_until = None;
                    s.memory_rev += 1;
                })?;
                self.store.delete_turns(chat_id)?;
                self.reply_now(chat_id, commands::RESET_REPLY).await?;
                Ok(TurnOutcome::Handled("command_reset"))
            }
            Command::Status => {
                let reply = commands::status_reply(state, now);
                self.reply_now(chat_id, &reply).await?;
                Ok(TurnOutcome::Handled("command_status"))
            }
        }
    }

    async fn goodnight_reply(
        &self,
        chat_id: i64,
        state: &ChatState,
        intent: Intent,
        wake_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome> {
        let history = self.store.fetch_recent(chat_id, 50, Some(state.persona_key.as_str()), Some(8000), 4000, 2000)?;
        let request = self.build_request(
            intent,
            state,
            None,
            None,
            None,
            history,
            None,
            None,
            None,
        );
        let response = match self.upstream.call(&request, None).await {
            Ok(r) => r,
            Err(e) => return self.handle_upstream_error(chat_id, e).await,
        };

        self.reply_now(chat_id, &response.reply).await?;
        let meta = serde_json::json!({
            "persona": state.persona_key,
            "intent": intent.as_label(),
        });
        self.store.save_assistant_message(chat_id, &response.reply, &meta, None)?;
        self.store.update_chat_state(chat_id, |s| {
            s.sleep_until = Some(wake_at);
            s.last_assistant_at = Some(now);
            if matches!(intent, Intent::UserGoodnight) {
                s.last_goodnight_sent_at = Some(now);
            }
        })?;
        Ok(TurnOutcome::Replied {
            delay_kind: if matches!(intent, Intent::UserGoodnight) {
                "user_goodnight"
            } else {
                "goodnight_followup"
            },
        })
    }

    async fn handle_upstream_error(&self, chat_id: i64, e: UpstreamError) -> Result<TurnOutcome> {
        self.store.record_event(
            e.event_kind(),
            Some(chat_id),
            None,
            &serde_json::json!({"error": e.to_string()}),
        )?;
        self.metrics
            .n8n_errors_total
            .with_label_values(&[e.metric_class()])
            .inc();

        if let UpstreamError::ClientError { .. } = &e {
            self.reply_now(chat_id, "Некорректный запрос").await?;
            return Ok(TurnOutcome::Handled("upstream_client_error"));
        }
        Err(TurnError::Upstream(e))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_request(
        &self,
        intent: Intent,
        state: &ChatState,
        user_id: Option<i64>,
        username: Option<&str>,
        lang: Option<&str>,
        history: Vec<nikabot_store::HistoryItem>,
        text: Option<&str>,
        media: Option<&PendingMedia>,
        trace_id: Option<&str>,
    ) -> UpstreamRequest {
        let history_entries = history
            .into_iter()
            .map(|h| HistoryEntry {
                role: match h.role {
                    nikabot_store::HistoryRole::User => "user".to_string(),
                    nikabot_store::HistoryRole::Assistant => "assistant".to_string(),
                },
                text: h.text,
                created_at: h.created_at,
            })
            .collect();

        let message = if text.is_some() || media.is_some() {
            Some(MessageInfo {
                text: text.map(|t| t.to_string()),
                origin: media.map(|m| media_origin_label(&m.origin).to_string()),
                audio_url: media.and_then(|m| m.audio_url.clone()),
                voice_file_id: media.and_then(|m| m.voice_file_id.clone()),
                image_url: media.and_then(|m| m.image_url.clone()),
                image_file_id: media.and_then(|m| m.image_file_id.clone()),
                image_mime_type: media.and_then(|m| m.image_mime_type.clone()),
                width: media.and_then(|m| m.width),
                height: media.and_then(|m| m.height),
                mime_type: media.and_then(|m| m.mime_type.clone()),
                duration: media.and_then(|m| m.duration),
                extras: Default::default(),
            })
        } else {
            None
        };

        UpstreamRequest {
            intent,
            chat: ChatInfo {
                chat_id: state.chat_id,
                user_id,
                lang: lang.map(|s| s.to_string()),
                username: username.map(|s| s.to_string()),
                persona: Some(state.persona_key.clone()),
                memory_rev: Some(state.memory_rev),
            },
            context: ContextInfo {
                history: history_entries,
                last_user_msg_at: state.last_user_msg_at,
                last_assistant_at: state.last_assistant_at,
            },
            message,
            trace_id: trace_id.map(|s| s.to_string()),
        }
    }

    async fn reply_now(&self, chat_id: i64, text: &str) -> Result<()> {
        self.sender
            .send_text(chat_id, text, None)
            .await
            .map_err(|_| TurnError::Transport(text.to_string()))?;
        Ok(())
    }

    /// Step 13/14, `delay ≤ 30s` branch: waits the delay inline (typing
    /// loop included), sends, and persists on this same turn before
    /// returning — so the caller (the queue worker, or a live webhook
    /// dispatch) only completes this turn once the reply is actually on
    /// the wire, keeping same-chat turns ordered (P3).
    async fn send_and_persist_inline(
        &self,
        chat_id: i64,
        text: String,
        meta: serde_json::Value,
        delay_seconds: i64,
        advance_proactive: bool,
    ) -> Result<()> {
        if delay_seconds > 0 {
            run_typing_loop(&self.sender, chat_id, delay_seconds).await;
        }
        self.sender
            .send_text(chat_id, &text, None)
            .await
            .map_err(|_| TurnError::Transport(text.clone()))?;
        self.metrics.replies_sent_total.inc();

        let now = Utc::now();
        self.store.save_assistant_message(chat_id, &text, &meta, None)?;
        self.store.update_chat_state(chat_id, |s| {
            s.last_assistant_at = Some(now);
            if advance_proactive {
                s.next_proactive_at = Some(nikabot_core::clock::future_with_jitter(
                    self.config.proactive.min_seconds,
                    self.config.proactive.max_seconds,
                    now,
                ));
            }
        })?;
        Ok(())
    }

    /// Step 13/14, `delay > 30s` branch: spawns a detached task that
    /// loops typing, sleeps out the delay, sends, and persists in its
    /// own transaction, per §4.6 step 13's "return the reply text to the
    /// caller synchronously without waiting." This is the only branch
    /// allowed to outlive the turn.
    fn spawn_detached_send(
        &self,
        chat_id: i64,
        text: String,
        meta: serde_json::Value,
        delay_seconds: i64,
        advance_proactive: bool,
    ) {
        let store = Arc::clone(&self.store);
        let sender = Arc::clone(&self.sender);
        let metrics = Arc::clone(&self.metrics);
        let proactive_cfg = self.config.proactive.clone();

        let task = async move {
            run_typing_loop(&sender, chat_id, delay_seconds).await;
            if sender.send_text(chat_id, &text, None).await.is_err() {
                warn!(chat_id, "transport send failed, assistant message not persisted");
                return;
            }
            metrics.replies_sent_total.inc();

            let now = Utc::now();
            if let Err(e) = store.save_assistant_message(chat_id, &text, &meta, None) {
                warn!(chat_id, error = %e, "failed to persist assistant message");
                return;
            }
            let _ = store.update_chat_state(chat_id, |s| {
                s.last_assistant_at = Some(now);
                if advance_proactive {
                    s.next_proactive_at = Some(nikabot_core::clock::future_with_jitter(
                        proactive_cfg.min_seconds,
                        proactive_cfg.max_seconds,
                        now,
                    ));
                }
            });
        };

        tokio::spawn(task);
    }
}

async fn run_typing_loop(sender: &Arc<dyn OutboundSender>, chat_id: i64, delay_seconds: i64) {
    let deadline = Utc::now() + Duration::seconds(delay_seconds);
    loop {
        let _ = sender.send_typing(chat_id).await;
        let remaining = deadline - Utc::now();
        if remaining <= Duration::zero() {
            break;
        }
        let tick = remaining.min(Duration::seconds(4));
        tokio::time::sleep(tick.to_std().unwrap_or(std::time::Duration::ZERO)).await;
    }
}

#[async_trait]
impl TurnFlusher for TurnProcessor {
    async fn flush_turn(&self, turn: FlushedTurn) {
        let input = TurnInput {
            chat_id: turn.chat_id,
            chat_type: turn.chat_type,
            user_id: turn.user_id,
            username: turn.username,
            lang: turn.lang,
            text: turn.text,
            media: turn.media,
            trace_id: turn.trace_id,
            platform_msg_id: None,
        };
        if let Err(e) = self.process_turn(input).await {
            warn!(chat_id = turn.chat_id, error = %e, "flushed turn processing failed");
        } else {
            info!(chat_id = turn.chat_id, "flushed turn processed");
        }
    }
}

fn clip(text: &str, max_len: usize) -> String {
    text.chars().take(max_len).collect()
}

fn local_minute_of_day(now: DateTime<Utc>, tz_offset_minutes: i64) -> u16 {
    let local = now + Duration::minutes(tz_offset_minutes);
    (local.time().num_seconds_from_midnight() / 60) as u16
}

fn is_goodnight_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    GOODNIGHT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn media_delay_origin(media: Option<&PendingMedia>) -> Option<MediaDelayOrigin> {
    media.map(|m| match m.origin {
        MediaOrigin::Photo => MediaDelayOrigin::Photo,
        MediaOrigin::Voice | MediaOrigin::Audio => MediaDelayOrigin::Voice {
            duration_secs: m.duration,
        },
    })
}

fn media_origin_label(origin: &MediaOrigin) -> &'static str {
    match origin {
        MediaOrigin::Photo => "photo",
        MediaOrigin::Voice => "voice",
        MediaOrigin::Audio => "audio",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goodnight_keyword_matches_case_insensitively() {
        assert!(is_goodnight_text("Споки ночи"));
        assert!(is_goodnight_text("пойду спать пожалуй"));
        assert!(!is_goodnight_text("привет"));
    }

    #[test]
    fn clip_truncates_to_char_count() {
        let text = "a".repeat(10);
        assert_eq!(clip(&text, 5).len(), 5);
    }

    #[test]
    fn local_minute_of_day_wraps_midnight() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-01-01T22:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        // +180 minutes offset => 01:00 local next day => minute 60
        assert_eq!(local_minute_of_day(now, 180), 60);
    }
}
