use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSONA: &str = "nika";
pub const DEFAULT_TIMEZONE_OFFSET_MINUTES: i64 = 180;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub chat_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub lang: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub text: String,
    pub platform_msg_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: i64,
    pub chat_id: i64,
    pub text: String,
    pub meta: serde_json::Value,
    pub platform_msg_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub kind: String,
    pub chat_id: Option<i64>,
    pub user_id: Option<i64>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One row of merged, time-ascending conversation history, as returned by
/// [`crate::history::fetch_recent`] — the shape the upstream client embeds
/// verbatim into `context.history[]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryItem {
    pub role: HistoryRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// The debounce buffer's in-flight payload, persisted verbatim as JSON in
/// `chat_state.pending_input_json` (§4.5). `_flushing` uses a leading
/// underscore to match the wire-level field name the original schema
/// uses; Rust field names can't start with `_` and stay idiomatic, so it
/// is renamed on the serde boundary instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingInput {
    pub text: String,
    pub media: Option<PendingMedia>,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub absolute_deadline_at: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub lang: Option<String>,
    pub chat_type: String,
    #[serde(rename = "_flushing", default)]
    pub flushing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaOrigin {
    Photo,
    Voice,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMedia {
    pub origin: MediaOrigin,
    pub image_url: Option<String>,
    pub image_file_id: Option<String>,
    pub image_mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio_url: Option<String>,
    pub voice_file_id: Option<String>,
    pub mime_type: Option<String>,
    pub duration: Option<f64>,
}

/// The per-chat coordination record (§3). One row per chat, created on
/// first contact by [`crate::chat_state::ensure_entities`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatState {
    pub chat_id: i64,
    pub persona_key: String,
    pub auto_enabled: bool,
    pub last_user_msg_at: Option<DateTime<Utc>>,
    pub last_assistant_at: Option<DateTime<Utc>>,
    pub next_proactive_at: Option<DateTime<Utc>>,
    pub last_morning_sent_at: Option<DateTime<Utc>>,
    pub last_goodnight_sent_at: Option<DateTime<Utc>>,
    pub last_goodnight_followup_sent_at: Option<DateTime<Utc>>,
    pub last_reengage_sent_at: Option<DateTime<Utc>>,
    pub last_long_pause_reply_at: Option<DateTime<Utc>>,
    pub proactive_via_userbot: bool,
    pub sleep_until: Option<DateTime<Utc>>,
    pub timezone_offset_minutes: i64,
    pub memory_rev: i64,
    pub pending_input_json: Option<String>,
    pub pending_started_at: Option<DateTime<Utc>>,
    pub pending_updated_at: Option<DateTime<Utc>>,
}

impl ChatState {
    pub fn pending(&self) -> Option<PendingInput> {
        self.pending_input_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveOutboxRow {
    pub id: i64,
    pub chat_id: i64,
    pub intent: String,
    pub text: String,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempts: i64,
}
