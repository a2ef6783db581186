use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Reply,
    ProactiveMorning,
    ProactiveEvening,
    ProactiveReengage,
    ProactiveGeneric,
    UserGoodnight,
    GoodnightFollowup,
}

impl Intent {
    pub fn as_label(&self) -> &'static str {
        match self {
            Intent::Reply => "reply",
            Intent::ProactiveMorning => "proactive_morning",
            Intent::ProactiveEvening => "proactive_evening",
            Intent::ProactiveReengage => "proactive_reengage",
            Intent::ProactiveGeneric => "proactive_generic",
            Intent::UserGoodnight => "user_goodnight",
            Intent::GoodnightFollowup => "goodnight_followup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatInfo {
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_rev: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextInfo {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_user_msg_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_assistant_at: Option<DateTime<Utc>>,
}

/// Open map: known fields are typed, everything else from the caller is
/// folded into `extras` and re-serialized verbatim (§9 "dynamic meta
/// dictionaries").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub intent: Intent,
    pub chat: ChatInfo,
    pub context: ContextInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseFlags {
    pub abuse: Option<bool>,
    pub mute_hours: Option<f64>,
}

/// Typed skeleton with unknown fields retained verbatim (§9).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponseMeta {
    pub model: Option<String>,
    pub tokens: Option<i64>,
    pub persona: Option<String>,
    pub intent: Option<String>,
    pub abuse: Option<bool>,
    pub mute_hours: Option<f64>,
    pub severity: Option<String>,
    #[serde(default)]
    pub flags: ResponseFlags,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResponseMeta {
    /// `meta.abuse == true` (or nested in `meta.flags`) per §4.6 step 11.
    pub fn abuse_flagged(&self) -> bool {
        self.abuse.unwrap_or(false) || self.flags.abuse.unwrap_or(false)
    }

    pub fn suggested_mute_hours(&self) -> Option<f64> {
        self.mute_hours.or(self.flags.mute_hours)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamResponse {
    pub reply: String,
    #[serde(default)]
    pub meta: ResponseMeta,
}
