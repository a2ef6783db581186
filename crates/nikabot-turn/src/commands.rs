//! In-band command handling (§4.6 step 5) — `/wake`, `/reset`, `/status`.
//! Matched by case-insensitive prefix against the normalised user text,
//! ahead of anti-spam/sleep/quiet-hour gating.

use chrono::{DateTime, Utc};

use nikabot_store::ChatState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Wake,
    Reset,
    Status,
}

impl Command {
    pub fn parse(text: &str) -> Option<Command> {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("/wake") {
            Some(Command::Wake)
        } else if lower.starts_with("/reset") {
            Some(Command::Reset)
        } else if lower.starts_with("/status") {
            Some(Command::Status)
        } else {
            None
        }
    }
}

pub const WAKE_REPLY: &str = "Я проснулась, с возвращением!";
pub const RESET_REPLY: &str = "Контекст очищен, начнём с чистого листа.";

/// Composes the `/status` reply: persona, proactive on/off, and sleep
/// state with a best-effort reason inferred from how long the mute still
/// has left to run — the data model doesn't track an explicit sleep
/// reason, so a quiet-window-scale mute reads as `quiet_hours`, a
/// day-scale one as `abuse_auto_block`, and anything else as `manual`.
pub fn status_reply(state: &ChatState, now: DateTime<Utc>) -> String {
    let auto = if state.auto_enabled { "on" } else { "off" };
    let sleep = match state.sleep_until {
        Some(until) if until > now => {
            let seconds_left = (until - now).num_seconds().max(0);
            let reason = sleep_reason(seconds_left);
            format!("yes ({seconds_left}s left, reason={reason})")
        }
        _ => "no".to_string(),
    };
    format!("persona={}; proactive {auto}; sleep {sleep}", state.persona_key)
}

fn sleep_reason(seconds_left: i64) -> &'static str {
    if seconds_left <= 12 * 3600 {
        "quiet_hours"
    } else if seconds_left <= 25 * 3600 {
        "abuse_auto_block"
    } else {
        "manual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive_prefix() {
        assert_eq!(Command::parse("/Wake now"), Some(Command::Wake));
        assert_eq!(Command::parse("/RESET"), Some(Command::Reset));
        assert_eq!(Command::parse("/status"), Some(Command::Status));
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn status_reports_no_sleep_when_not_muted() {
        let state = test_state(None);
        assert!(status_reply(&state, Utc::now()).contains("sleep no"));
    }

    #[test]
    fn status_reports_sleep_with_reason() {
        let now = Utc::now();
        let state = test_state(Some(now + chrono::Duration::hours(5)));
        let reply = status_reply(&state, now);
        assert!(reply.contains("sleep yes"));
        assert!(reply.contains("reason=quiet_hours"));
    }

    fn test_state(sleep_until: Option<DateTime<Utc>>) -> ChatState {
        ChatState {
            chat_id: 1,
            persona_key: "nika".to_string(),
            auto_enabled: true,
            last_user_msg_at: None,
            last_assistant_at: None,
            next_proactive_at: None,
            last_morning_sent_at: None,
            last_goodnight_sent_at: None,
            last_goodnight_followup_sent_at: None,
            last_reengage_sent_at: None,
            last_long_pause_reply_at: None,
            proactive_via_userbot: false,
            sleep_until,
            timezone_offset_minutes: 180,
            memory_rev: 1,
            pending_input_json: None,
            pending_started_at: None,
            pending_updated_at: None,
        }
    }
}
