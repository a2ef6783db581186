//! Proactive Scheduler (C8, §4.8): a 60 s sweep over every auto-enabled
//! chat that stamps-then-sends a morning/evening/reengage/generic nudge,
//! grounded on the teacher's tick-loop scheduler engine shape (interval
//! + `watch::Receiver<bool>` shutdown, per-row try/continue so one
//! chat's failure never blocks the sweep).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use nikabot_core::config::NikabotConfig;
use nikabot_core::window::TimeWindow;
use nikabot_core::Metrics;
use nikabot_store::{ChatState, Store};
use nikabot_turn::sender::OutboundSender;
use nikabot_upstream::{ChatInfo, ContextInfo, Intent, UpstreamClient, UpstreamRequest};

use crate::error::Result;

const TICK_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SelectedIntent {
    Morning,
    Evening,
    Reengage,
    Generic,
}

impl SelectedIntent {
    fn as_upstream_intent(self) -> Intent {
        match self {
            SelectedIntent::Morning => Intent::ProactiveMorning,
            SelectedIntent::Evening => Intent::ProactiveEvening,
            SelectedIntent::Reengage => Intent::ProactiveReengage,
            SelectedIntent::Generic => Intent::ProactiveGeneric,
        }
    }

    fn metric_label(self) -> &'static str {
        self.as_upstream_intent().as_label()
    }
}

pub struct ProactiveScheduler {
    store: Arc<Store>,
    upstream: Arc<UpstreamClient>,
    metrics: Arc<Metrics>,
    config: Arc<NikabotConfig>,
    sender: Arc<dyn OutboundSender>,
}

impl ProactiveScheduler {
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

    /// Drives the 60 s sweep until `shutdown` signals true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("proactive scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(TICK_SECONDS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("proactive scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep over every auto-enabled chat. Each chat commits (or
    /// fails) independently — a single row's error never blocks the
    /// rest (§4.8 step 13).
    pub async fn tick(&self) {
        let chats = match self.store.chat_states_with_auto_enabled() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to list auto-enabled chats for proactive sweep");
                return;
            }
        };
        for state in chats {
            let chat_id = state.chat_id;
            if let Err(e) = self.process_chat(state).await {
                warn!(chat_id, error = %e, "proactive sweep failed for chat");
            }
        }
    }

    async fn process_chat(&self, state: ChatState) -> Result<()> {
        let now = Utc::now();

        // 1. Sleep gate.
        if let Some(until) = state.sleep_until {
            if until > now {
                return Ok(());
            }
        }

        // 2. Local time.
        let minute_of_day = local_minute_of_day(now, state.timezone_offset_minutes);

        // 3. Quiet window.
        if let Some(quiet) = self.config.proactive.quiet_window.as_deref().and_then(TimeWindow::parse) {
            if quiet.contains(minute_of_day) {
                return Ok(());
            }
        }

        // 4. Last activity.
        let last_activity = max_opt(state.last_user_msg_at, state.last_assistant_at);

        // 5. Select intent by priority.
        let Some(intent) = self.select_intent(&state, now, minute_of_day, last_activity) else {
            return Ok(());
        };

        // 6. Per-chat advisory lock: SQLite has no separate advisory-lock
        // primitive. `update_chat_state`'s single-writer transaction
        // already serialises every read-modify-write against this chat
        // row; that transactional exclusivity is the substitution this
        // engine uses in place of `pg_try_advisory_xact_lock`.

        // 7. Stamp first, then send.
        let stamped = self.stamp_intent(state.chat_id, intent, now)?;

        // 8. Build request; empty history for morning/evening/reengage.
        let history = if intent == SelectedIntent::Generic {
            self.store.fetch_recent(
                stamped.chat_id,
                50,
                Some(stamped.persona_key.as_str()),
                Some(8000),
                4000,
                2000,
            )?
        } else {
            Vec::new()
        };
        let request = UpstreamRequest {
            intent: intent.as_upstream_intent(),
            chat: ChatInfo {
                chat_id: stamped.chat_id,
                user_id: None,
                lang: None,
                username: None,
                persona: Some(stamped.persona_key.clone()),
                memory_rev: Some(stamped.memory_rev),
            },
            context: ContextInfo {
                history: history
                    .into_iter()
                    .map(|h| nikabot_upstream::HistoryEntry {
                        role: match h.role {
                            nikabot_store::HistoryRole::User => "user".to_string(),
                            nikabot_store::HistoryRole::Assistant => "assistant".to_string(),
                        },
                        text: h.text,
                        created_at: h.created_at,
                    })
                    .collect(),
                last_user_msg_at: stamped.last_user_msg_at,
                last_assistant_at: stamped.last_assistant_at,
            },
            message: None,
            trace_id: None,
        };

        // 9. Call upstream.
        let response = match self.upstream.call(&request, None).await {
            Ok(r) => r,
            Err(e) => {
                self.store.record_event(
                    e.event_kind(),
                    Some(stamped.chat_id),
                    None,
                    &serde_json::json!({"error": e.to_string(), "intent": intent.metric_label()}),
                )?;
                if intent == SelectedIntent::Generic {
                    self.bump_next_proactive(stamped.chat_id, stamped.last_assistant_at, now)?;
                }
                return Ok(());
            }
        };

        // 10. Morning anti-spam guard.
        if intent == SelectedIntent::Morning {
            let window_start = now - Duration::minutes(30);
            let recent = self.store.count_assistant_messages_since(stamped.chat_id, window_start)?;
            if recent >= 1 {
                self.store.update_chat_state(stamped.chat_id, |s| {
                    s.auto_enabled = false;
                })?;
                self.store.record_event(
                    "proactive_morning_spam_disabled",
                    Some(stamped.chat_id),
                    None,
                    &serde_json::json!({}),
                )?;
                return Ok(());
            }
        }

        // 11. Delivery.
        let meta = serde_json::json!({
            "persona": stamped.persona_key,
            "intent": intent.metric_label(),
        });
        if stamped.proactive_via_userbot {
            self.store.enqueue_outbox(stamped.chat_id, intent.metric_label(), &response.reply, &meta)?;
        } else {
            self.sender.send_text(stamped.chat_id, &response.reply, None).await?;
            self.store.save_assistant_message(stamped.chat_id, &response.reply, &meta, None)?;
            self.store.update_chat_state(stamped.chat_id, |s| {
                s.last_assistant_at = Some(now);
            })?;
        }
        self.metrics
            .proactive_sent_total
            .with_label_values(&[intent.metric_label()])
            .inc();

        // 12. Recompute next_proactive_at for generic.
        if intent == SelectedIntent::Generic {
            self.bump_next_proactive(stamped.chat_id, Some(now), now)?;
        }

        Ok(())
    }

    fn select_intent(
        &self,
        state: &ChatState,
        now: DateTime<Utc>,
        minute_of_day: u16,
        last_activity: Option<DateTime<Utc>>,
    ) -> Option<SelectedIntent> {
        let cfg = &self.config.proactive;

        if let Some(morning) = cfg.morning_window.as_deref().and_then(TimeWindow::parse) {
            if morning.contains(minute_of_day) && !sent_today(state.last_morning_sent_at, now) {
                return Some(SelectedIntent::Morning);
            }
        }

        if let Some(evening) = cfg.evening_window.as_deref().and_then(TimeWindow::parse) {
            let cooldown_ok = state
                .last_goodnight_sent_at
                .map(|t| now - t >= Duration::minutes(30))
                .unwrap_or(true);
            if evening.contains(minute_of_day)
                && !sent_today(state.last_goodnight_sent_at, now)
                && cooldown_ok
            {
                return Some(SelectedIntent::Evening);
            }
        }

        if let Some(activity) = last_activity {
            let hours_since = (now - activity).num_hours();
            let cooldown_ok = state
                .last_reengage_sent_at
                .map(|t| now - t >= Duration::hours(cfg.reengage_cooldown_hours))
                .unwrap_or(true);
            if hours_since >= cfg.reengage_min_hours && cooldown_ok {
                return Some(SelectedIntent::Reengage);
            }
        }

        if cfg.generic_enabled {
            if let Some(next) = state.next_proactive_at {
                if next <= now {
                    return Some(SelectedIntent::Generic);
                }
            }
        }

        None
    }

    fn stamp_intent(&self, chat_id: i64, intent: SelectedIntent, now: DateTime<Utc>) -> Result<ChatState> {
        let state = self.store.update_chat_state(chat_id, |s| match intent {
            SelectedIntent::Morning => s.last_morning_sent_at = Some(now),
            SelectedIntent::Evening => s.last_goodnight_sent_at = Some(now),
            SelectedIntent::Reengage => s.last_reengage_sent_at = Some(now),
            SelectedIntent::Generic => {}
        })?;
        Ok(state)
    }

    fn bump_next_proactive(
        &self,
        chat_id: i64,
        base: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let min = self.config.proactive.min_seconds;
        let max = self.config.proactive.max_seconds;
        self.store.update_chat_state(chat_id, |s| {
            s.next_proactive_at = Some(nikabot_core::clock::future_with_jitter(min, max, base.unwrap_or(now)));
        })?;
        Ok(())
    }
}

fn max_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn sent_today(stamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    stamp.is_some_and(|t| t.date_naive() == now.date_naive())
}

fn local_minute_of_day(now: DateTime<Utc>, tz_offset_minutes: i64) -> u16 {
    use chrono::Timelike;
    let local = now + Duration::minutes(tz_offset_minutes);
    (local.time().num_seconds_from_midnight() / 60) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_today_true_for_same_utc_date() {
        let now = Utc::now();
        assert!(sent_today(Some(now), now));
    }

    #[test]
    fn sent_today_false_for_prior_day() {
        let now = Utc::now();
        assert!(!sent_today(Some(now - Duration::days(1)), now));
    }

    #[test]
    fn sent_today_false_when_absent() {
        assert!(!sent_today(None, Utc::now()));
    }
}
