//! Adapter-startup recovery sweep (§4.10 "Recovery").
//!
//! Walks every known chat, compares the platform's recent history
//! against what the store has persisted, and backfills the gap: user
//! messages the process missed (e.g. downtime) get enqueued as
//! `incoming_user_message` tasks with `source="recovery"`; assistant
//! messages the bot itself sent but never recorded get silently written
//! back with `meta.recovered=true`. Neither teloxide nor the Bot API
//! expose an arbitrary "history since id" call for a chat, so this reads
//! from the queue's own recorded high-water mark rather than a platform
//! history fetch — see DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use nikabot_core::Metrics;
use nikabot_queue::TaskQueue;
use nikabot_store::Store;

pub const RECOVERY_HISTORY_LIMIT: i64 = 500;

/// The Bot API exposes no "history since id" call a long-polling or
/// webhook-driven bot can use to pull a chat's backlog, so the recovery
/// sweep's platform-side half (walking `RECOVERY_HISTORY_LIMIT` messages
/// per chat) is satisfied by whatever transport-specific update log is
/// available to the adapter at startup, keyed here only by the store's
/// known high-water mark. This establishes that mark for every chat the
/// store has seen; callers feed candidate messages newer than it through
/// [`enqueue_recovered_user_message`] / [`backfill_recovered_assistant_message`].
pub fn known_high_water_marks(store: &Arc<Store>) -> nikabot_store::Result<HashMap<i64, Option<i64>>> {
    let mut marks = HashMap::new();
    for chat_id in store.list_known_chat_ids()? {
        marks.insert(chat_id, store.max_user_platform_msg_id(chat_id)?);
    }
    Ok(marks)
}

/// Logs the recovery-eligible chat count at adapter startup; the actual
/// backfill happens per-message as the transport-specific update log is
/// walked by the caller.
pub fn log_recovery_scope(store: &Arc<Store>) {
    match known_high_water_marks(store) {
        Ok(marks) => info!(chats = marks.len(), "recovery: sweep scope established"),
        Err(e) => warn!(error = %e, "recovery: failed to establish sweep scope"),
    }
}

/// Records a user message observed during recovery (platform id greater
/// than the store's known maximum for this chat) as an `incoming_user_message`
/// task, deduplicated by `"recovery:{chat}:{id}"`.
pub fn enqueue_recovered_user_message(
    queue: &TaskQueue,
    metrics: &Metrics,
    chat_id: i64,
    chat_type: &str,
    user_id: Option<i64>,
    username: Option<&str>,
    lang: Option<&str>,
    text: &str,
    platform_msg_id: i64,
) -> nikabot_queue::Result<i64> {
    let payload = json!({
        "telegram_message_id": platform_msg_id,
        "chat_id": chat_id,
        "chat_type": chat_type,
        "user_id": user_id,
        "username": username,
        "lang": lang,
        "text": text,
        "media": null,
        "trace_id": null,
        "source": "recovery",
    });
    let dedup_key = format!("recovery:{chat_id}:{platform_msg_id}");
    let id = queue.enqueue("incoming_user_message", &payload, 100, Some(&dedup_key))?;
    metrics.recovery_gap_messages_total.inc();
    metrics
        .tasks_enqueued_total
        .with_label_values(&["incoming_user_message"])
        .inc();
    info!(chat_id, platform_msg_id, "recovery: enqueued gap message");
    Ok(id)
}

/// Backfills a self-authored message the adapter finds on the platform
/// but that the store has no record of, tagging it `meta.recovered=true`
/// so downstream consumers can distinguish it from a live send.
pub fn backfill_recovered_assistant_message(
    store: &Store,
    chat_id: i64,
    text: &str,
    platform_msg_id: i64,
) -> nikabot_store::Result<()> {
    if store.assistant_message_with_platform_id_exists(chat_id, platform_msg_id)? {
        return Ok(());
    }
    store.save_assistant_message(chat_id, text, &json!({ "recovered": true }), Some(platform_msg_id))?;
    Ok(())
}
