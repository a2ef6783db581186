use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Flat shape actually read off the wire (TOML file + environment) — every
/// field name here is the literal env var name, lowercased, so operators
/// can keep using `TELEGRAM_BOT_TOKEN` etc. without a `NIKABOT_` prefix.
/// [`NikabotConfig`] regroups this into an ergonomic nested view for the
/// rest of the crate tree, mirroring the original's `model_post_init` flat
/// -> nested flattening, just in the opposite direction (flat in, nested
/// out).
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    telegram_bot_token: String,
    webhook_secret: String,
    public_base_url: String,
    n8n_webhook_url: String,
    #[serde(default = "default_db_dsn")]
    db_dsn: String,
    #[serde(default = "default_upload_dir")]
    upload_dir: String,
    #[serde(default = "default_app_host")]
    app_host: String,
    #[serde(default = "default_app_port")]
    app_port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,

    #[serde(default = "default_user_min_seconds_between_msg")]
    user_min_seconds_between_msg: i64,
    #[serde(default = "default_max_user_text_len")]
    max_user_text_len: usize,

    #[serde(default = "default_reply_delay_min_seconds")]
    reply_delay_min_seconds: i64,
    #[serde(default = "default_reply_delay_max_seconds")]
    reply_delay_max_seconds: i64,
    #[serde(default)]
    reply_rare_long_prob: f64,
    #[serde(default = "default_reply_rare_long_min_seconds")]
    reply_rare_long_min_seconds: i64,
    #[serde(default = "default_reply_rare_long_max_seconds")]
    reply_rare_long_max_seconds: i64,
    #[serde(default = "default_reply_inactivity_long_threshold_minutes")]
    reply_inactivity_long_threshold_minutes: i64,
    #[serde(default = "default_reply_inactivity_long_min_seconds")]
    reply_inactivity_long_min_seconds: i64,
    #[serde(default = "default_reply_inactivity_long_max_seconds")]
    reply_inactivity_long_max_seconds: i64,
    #[serde(default = "default_photo_reply_delay_min")]
    photo_reply_delay_min: i64,
    #[serde(default = "default_photo_reply_delay_max")]
    photo_reply_delay_max: i64,
    #[serde(default = "default_voice_delay_extra_min")]
    voice_delay_extra_min: i64,
    #[serde(default = "default_voice_delay_extra_max")]
    voice_delay_extra_max: i64,

    #[serde(default = "bool_true")]
    auto_messages_default: bool,
    #[serde(default = "default_proactive_min_seconds")]
    proactive_min_seconds: i64,
    #[serde(default = "default_proactive_max_seconds")]
    proactive_max_seconds: i64,
    proactive_morning_window: Option<String>,
    proactive_evening_window: Option<String>,
    proactive_quiet_window: Option<String>,
    #[serde(default = "default_reengage_min_hours")]
    reengage_min_hours: i64,
    #[serde(default = "default_reengage_cooldown_hours")]
    reengage_cooldown_hours: i64,
    #[serde(default = "default_timezone_offset_minutes")]
    default_timezone_offset_minutes: i64,
    #[serde(default = "bool_true")]
    proactive_generic_enabled: bool,

    #[serde(default = "default_abuse_window_minutes")]
    abuse_window_minutes: i64,
    #[serde(default = "default_abuse_max_in_window")]
    abuse_max_in_window: i64,
    #[serde(default = "default_abuse_auto_block_hours")]
    abuse_auto_block_hours: i64,

    #[serde(default = "default_task_lease_seconds")]
    task_lease_seconds: i64,
    #[serde(default = "default_task_heartbeat_seconds")]
    task_heartbeat_seconds: i64,
    #[serde(default = "default_task_watchdog_interval")]
    task_watchdog_interval: i64,
    #[serde(default = "default_recovery_history_limit")]
    recovery_history_limit: i64,

    // Second long-polling ingress path (§4.10 B) — runs alongside the
    // webhook bot against its own bot token, sharing every downstream
    // component (buffer, processor, sender). Absent unless configured.
    userbot_bot_token: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_db_dsn() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.nikabot/nikabot.db")
}
fn default_upload_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.nikabot/uploads")
}
fn default_app_host() -> String {
    "0.0.0.0".to_string()
}
fn default_app_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_user_min_seconds_between_msg() -> i64 {
    5
}
fn default_max_user_text_len() -> usize {
    4000
}
fn default_reply_delay_min_seconds() -> i64 {
    5
}
fn default_reply_delay_max_seconds() -> i64 {
    10
}
fn default_reply_rare_long_min_seconds() -> i64 {
    180
}
fn default_reply_rare_long_max_seconds() -> i64 {
    360
}
fn default_reply_inactivity_long_threshold_minutes() -> i64 {
    120
}
fn default_reply_inactivity_long_min_seconds() -> i64 {
    180
}
fn default_reply_inactivity_long_max_seconds() -> i64 {
    300
}
fn default_photo_reply_delay_min() -> i64 {
    5
}
fn default_photo_reply_delay_max() -> i64 {
    6
}
fn default_voice_delay_extra_min() -> i64 {
    2
}
fn default_voice_delay_extra_max() -> i64 {
    4
}
fn default_proactive_min_seconds() -> i64 {
    3600
}
fn default_proactive_max_seconds() -> i64 {
    7200
}
fn default_reengage_min_hours() -> i64 {
    6
}
fn default_reengage_cooldown_hours() -> i64 {
    12
}
fn default_timezone_offset_minutes() -> i64 {
    180
}
fn default_abuse_window_minutes() -> i64 {
    30
}
fn default_abuse_max_in_window() -> i64 {
    10
}
fn default_abuse_auto_block_hours() -> i64 {
    24
}
fn default_task_lease_seconds() -> i64 {
    60
}
fn default_task_heartbeat_seconds() -> i64 {
    30
}
fn default_task_watchdog_interval() -> i64 {
    10
}
fn default_recovery_history_limit() -> i64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub telegram_bot_token: String,
    pub webhook_secret: String,
    pub public_base_url: String,
    pub n8n_webhook_url: String,
    pub db_dsn: String,
    pub upload_dir: String,
    pub app_host: String,
    pub app_port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    pub user_min_seconds_between_msg: i64,
    pub max_user_text_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyDelayConfig {
    pub min_seconds: i64,
    pub max_seconds: i64,
    pub rare_long_probability: f64,
    pub rare_long_min_seconds: i64,
    pub rare_long_max_seconds: i64,
    pub inactivity_long_threshold_minutes: i64,
    pub inactivity_long_min_seconds: i64,
    pub inactivity_long_max_seconds: i64,
    pub photo_delay_min_seconds: i64,
    pub photo_delay_max_seconds: i64,
    pub voice_delay_extra_min_seconds: i64,
    pub voice_delay_extra_max_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    pub default_auto_messages: bool,
    pub min_seconds: i64,
    pub max_seconds: i64,
    pub morning_window: Option<String>,
    pub evening_window: Option<String>,
    pub quiet_window: Option<String>,
    pub reengage_min_hours: i64,
    pub reengage_cooldown_hours: i64,
    pub default_timezone_offset_minutes: i64,
    pub generic_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub abuse_window_minutes: i64,
    pub abuse_max_in_window: i64,
    pub abuse_auto_block_hours: i64,
}

/// Second long-polling transport ingress (§4.10 B). `None` unless a
/// token is configured, in which case the gateway binary starts this
/// adapter alongside the webhook bot, sharing every downstream
/// component. See DESIGN.md for why this runs over the Bot API rather
/// than a true MTProto user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserbotConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub lease_seconds: i64,
    pub heartbeat_seconds: i64,
    pub watchdog_interval_seconds: i64,
    pub recovery_history_limit: i64,
}

/// Top-level config (nikabot.toml + flat env overrides, see [`RawConfig`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NikabotConfig {
    pub core: CoreConfig,
    pub turn: TurnConfig,
    pub reply_delay: ReplyDelayConfig,
    pub proactive: ProactiveConfig,
    pub moderation: ModerationConfig,
    pub queue: QueueConfig,
    pub userbot: Option<UserbotConfig>,
}

impl From<RawConfig> for NikabotConfig {
    fn from(r: RawConfig) -> Self {
        NikabotConfig {
            core: CoreConfig {
                telegram_bot_token: r.telegram_bot_token,
                webhook_secret: r.webhook_secret,
                public_base_url: r.public_base_url,
                n8n_webhook_url: r.n8n_webhook_url,
                db_dsn: r.db_dsn,
                upload_dir: r.upload_dir,
                app_host: r.app_host,
                app_port: r.app_port,
                log_level: r.log_level,
            },
            turn: TurnConfig {
                user_min_seconds_between_msg: r.user_min_seconds_between_msg,
                max_user_text_len: r.max_user_text_len,
            },
            reply_delay: ReplyDelayConfig {
                min_seconds: r.reply_delay_min_seconds,
                max_seconds: r.reply_delay_max_seconds,
                rare_long_probability: r.reply_rare_long_prob,
                rare_long_min_seconds: r.reply_rare_long_min_seconds,
                rare_long_max_seconds: r.reply_rare_long_max_seconds,
                inactivity_long_threshold_minutes: r.reply_inactivity_long_threshold_minutes,
                inactivity_long_min_seconds: r.reply_inactivity_long_min_seconds,
                inactivity_long_max_seconds: r.reply_inactivity_long_max_seconds,
                photo_delay_min_seconds: r.photo_reply_delay_min,
                photo_delay_max_seconds: r.photo_reply_delay_max,
                voice_delay_extra_min_seconds: r.voice_delay_extra_min,
                voice_delay_extra_max_seconds: r.voice_delay_extra_max,
            },
            proactive: ProactiveConfig {
                default_auto_messages: r.auto_messages_default,
                min_seconds: r.proactive_min_seconds,
                max_seconds: r.proactive_max_seconds,
                morning_window: r.proactive_morning_window,
                evening_window: r.proactive_evening_window,
                quiet_window: r.proactive_quiet_window,
                reengage_min_hours: r.reengage_min_hours,
                reengage_cooldown_hours: r.reengage_cooldown_hours,
                default_timezone_offset_minutes: r.default_timezone_offset_minutes,
                generic_enabled: r.proactive_generic_enabled,
            },
            moderation: ModerationConfig {
                abuse_window_minutes: r.abuse_window_minutes,
                abuse_max_in_window: r.abuse_max_in_window,
                abuse_auto_block_hours: r.abuse_auto_block_hours,
            },
            queue: QueueConfig {
                lease_seconds: r.task_lease_seconds,
                heartbeat_seconds: r.task_heartbeat_seconds,
                watchdog_interval_seconds: r.task_watchdog_interval,
                recovery_history_limit: r.recovery_history_limit,
            },
            userbot: r.userbot_bot_token.map(|bot_token| UserbotConfig { bot_token }),
        }
    }
}

impl NikabotConfig {
    /// Load config from a TOML file with flat environment-variable
    /// overrides layered on top (higher precedence), per the documented
    /// external contract in `PUBLIC_BASE_URL`/`N8N_WEBHOOK_URL`/... style.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let raw: RawConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::raw())
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(raw.into())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.nikabot/nikabot.toml")
}
