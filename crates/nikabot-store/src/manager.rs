use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{Result, StoreError};
use crate::types::{
    Chat, ChatState, ProactiveOutboxRow, User, DEFAULT_PERSONA, DEFAULT_TIMEZONE_OFFSET_MINUTES,
};

/// Owns the single SQLite connection backing the coordination record,
/// history, and audit tables. A plain `std::sync::Mutex` rather than an
/// async one: every call is a handful of indexed lookups, so holding the
/// lock across an `.await` is never required and callers invoke these
/// methods synchronously from within async handlers, same as the
/// teacher's `MemoryManager`.
pub struct Store {
    conn: Mutex<rusqlite::Connection>,
}

impl Store {
    pub fn new(conn: rusqlite::Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::new(conn)
    }

    /// Upserts Chat + User + ChatState and refreshes `username`/`lang`
    /// (§4.2). Returns the resulting `ChatState`.
    pub fn ensure_entities(
        &self,
        chat_id: i64,
        chat_type: &str,
        user_id: Option<i64>,
        username: Option<&str>,
        lang: Option<&str>,
        default_auto_enabled: bool,
    ) -> Result<ChatState> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute(
            "INSERT INTO chats (id, chat_type, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO NOTHING",
            params![chat_id, chat_type, now.to_rfc3339()],
        )?;

        if let Some(uid) = user_id {
            tx.execute(
                "INSERT INTO users (id, username, lang, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    lang = COALESCE(excluded.lang, users.lang),
                    updated_at = excluded.updated_at",
                params![uid, username, lang, now.to_rfc3339()],
            )?;
        }

        tx.execute(
            "INSERT INTO chat_state (chat_id, persona_key, auto_enabled, timezone_offset_minutes, memory_rev)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(chat_id) DO NOTHING",
            params![
                chat_id,
                DEFAULT_PERSONA,
                default_auto_enabled as i64,
                DEFAULT_TIMEZONE_OFFSET_MINUTES
            ],
        )?;

        let state = fetch_chat_state_tx(&tx, chat_id)?.ok_or(StoreError::ChatStateNotFound { chat_id })?;
        tx.commit()?;
        Ok(state)
    }

    pub fn get_chat_state(&self, chat_id: i64) -> Result<Option<ChatState>> {
        let conn = self.conn.lock().unwrap();
        fetch_chat_state(&conn, chat_id)
    }

    /// Read-modify-write inside a single transaction — the mechanism that
    /// makes "a single turn is one transaction" true (§5): the mutator
    /// closure receives the freshly-loaded state and returns the state to
    /// persist, all without yielding the lock in between.
    pub fn update_chat_state<F>(&self, chat_id: i64, mutate: F) -> Result<ChatState>
    where
        F: FnOnce(&mut ChatState),
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut state =
            fetch_chat_state_tx(&tx, chat_id)?.ok_or(StoreError::ChatStateNotFound { chat_id })?;
        mutate(&mut state);
        write_chat_state_tx(&tx, &state)?;
        tx.commit()?;
        Ok(state)
    }

    pub fn save_user_message(
        &self,
        chat_id: i64,
        user_id: Option<i64>,
        text: &str,
        platform_msg_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (chat_id, user_id, text, platform_msg_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chat_id, user_id, text, platform_msg_id, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn save_assistant_message(
        &self,
        chat_id: i64,
        text: &str,
        meta: &serde_json::Value,
        platform_msg_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO assistant_messages (chat_id, text, meta_json, platform_msg_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat_id,
                text,
                serde_json::to_string(meta)?,
                platform_msg_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// `/reset` deletes the full turn history for a chat (see SPEC_FULL.md
    /// §2 on the command handler's extra responsibility beyond bumping
    /// `memory_rev`).
    pub fn delete_turns(&self, chat_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        conn.execute(
            "DELETE FROM assistant_messages WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(())
    }

    pub fn record_event(
        &self,
        kind: &str,
        chat_id: Option<i64>,
        user_id: Option<i64>,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (kind, chat_id, user_id, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind,
                chat_id,
                user_id,
                serde_json::to_string(payload)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count_events_since(&self, chat_id: i64, kind: &str, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE chat_id = ?1 AND kind = ?2 AND created_at >= ?3",
            params![chat_id, kind, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_assistant_messages_since(&self, chat_id: i64, since: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assistant_messages WHERE chat_id = ?1 AND created_at >= ?2",
            params![chat_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Writes the debounce buffer payload (§4.5). `started_at` is passed
    /// separately from the payload's own `started_at` field only for a new
    /// buffer; on extension callers pass the original `started_at` back
    /// unchanged since the absolute deadline is anchored to it.
    pub fn set_pending(
        &self,
        chat_id: i64,
        payload: &crate::types::PendingInput,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chat_state SET pending_input_json = ?2, pending_started_at = ?3, pending_updated_at = ?4
             WHERE chat_id = ?1",
            params![
                chat_id,
                serde_json::to_string(payload)?,
                payload.started_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Clears the debounce buffer for a chat — called once a flush has
    /// captured the payload for handoff to the turn processor.
    pub fn clear_pending(&self, chat_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chat_state SET pending_input_json = NULL, pending_started_at = NULL, pending_updated_at = NULL
             WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(())
    }

    pub fn chat_states_with_auto_enabled(&self) -> Result<Vec<ChatState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT chat_id, persona_key, auto_enabled, last_user_msg_at, last_assistant_at,
                    next_proactive_at, last_morning_sent_at, last_goodnight_sent_at,
                    last_goodnight_followup_sent_at, last_reengage_sent_at,
                    last_long_pause_reply_at, proactive_via_userbot, sleep_until,
                    timezone_offset_minutes, memory_rev, pending_input_json,
                    pending_started_at, pending_updated_at
             FROM chat_state WHERE auto_enabled = 1 AND persona_key IS NOT NULL",
        )?;
        let rows = stmt.query_map([], row_to_chat_state)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, chat_type, created_at FROM chats WHERE id = ?1",
            params![chat_id],
            |row| {
                Ok(Chat {
                    id: row.get(0)?,
                    chat_type: row.get(1)?,
                    created_at: parse_dt(row.get::<_, String>(2)?),
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, username, lang, created_at, updated_at FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    lang: row.get(2)?,
                    created_at: parse_dt(row.get::<_, String>(3)?),
                    updated_at: parse_dt(row.get::<_, String>(4)?),
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// All chat ids known to the store, for adapter-startup recovery
    /// sweeps that need to walk every chat regardless of `auto_enabled`.
    pub fn list_known_chat_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT id FROM chats")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Highest platform message id already recorded as a user message for
    /// this chat, used to find the recovery gap (§4.10).
    pub fn max_user_platform_msg_id(&self, chat_id: i64) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT MAX(platform_msg_id) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )
        .map_err(StoreError::from)
    }

    /// Whether an assistant message tagged with this platform message id
    /// has already been persisted, used to silently backfill self-authored
    /// messages the adapter finds on the platform but not in the store.
    pub fn assistant_message_with_platform_id_exists(
        &self,
        chat_id: i64,
        platform_msg_id: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assistant_messages WHERE chat_id = ?1 AND platform_msg_id = ?2",
            params![chat_id, platform_msg_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -- Proactive outbox (C9) --

    pub fn enqueue_outbox(
        &self,
        chat_id: i64,
        intent: &str,
        text: &str,
        meta: &serde_json::Value,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO proactive_outbox (chat_id, intent, text, meta_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat_id,
                intent,
                text,
                serde_json::to_string(meta)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_pending_outbox(&self, limit: i64) -> Result<Vec<ProactiveOutboxRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT id, chat_id, intent, text, meta_json, created_at, sent_at, attempts
             FROM proactive_outbox WHERE sent_at IS NULL ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_outbox)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn mark_outbox_sent(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE proactive_outbox SET sent_at = ?1, attempts = attempts + 1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn increment_outbox_attempts(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE proactive_outbox SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Exposes the raw connection for crates (queue, history) that need
    /// direct SQL access against the same database file without forcing
    /// every query through this manager's method surface.
    pub fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

fn fetch_chat_state(conn: &rusqlite::Connection, chat_id: i64) -> Result<Option<ChatState>> {
    conn.query_row(
        "SELECT chat_id, persona_key, auto_enabled, last_user_msg_at, last_assistant_at,
                next_proactive_at, last_morning_sent_at, last_goodnight_sent_at,
                last_goodnight_followup_sent_at, last_reengage_sent_at,
                last_long_pause_reply_at, proactive_via_userbot, sleep_until,
                timezone_offset_minutes, memory_rev, pending_input_json,
                pending_started_at, pending_updated_at
         FROM chat_state WHERE chat_id = ?1",
        params![chat_id],
        row_to_chat_state,
    )
    .optional()
    .map_err(StoreError::from)
}

fn fetch_chat_state_tx(
    tx: &rusqlite::Transaction,
    chat_id: i64,
) -> Result<Option<ChatState>> {
    tx.query_row(
        "SELECT chat_id, persona_key, auto_enabled, last_user_msg_at, last_assistant_at,
                next_proactive_at, last_morning_sent_at, last_goodnight_sent_at,
                last_goodnight_followup_sent_at, last_reengage_sent_at,
                last_long_pause_reply_at, proactive_via_userbot, sleep_until,
                timezone_offset_minutes, memory_rev, pending_input_json,
                pending_started_at, pending_updated_at
         FROM chat_state WHERE chat_id = ?1",
        params![chat_id],
        row_to_chat_state,
    )
    .optional()
    .map_err(StoreError::from)
}

fn write_chat_state_tx(tx: &rusqlite::Transaction, state: &ChatState) -> Result<()> {
    tx.execute(
        "UPDATE chat_state SET
            persona_key = ?2, auto_enabled = ?3, last_user_msg_at = ?4, last_assistant_at = ?5,
            next_proactive_at = ?6, last_morning_sent_at = ?7, last_goodnight_sent_at = ?8,
            last_goodnight_followup_sent_at = ?9, last_reengage_sent_at = ?10,
            last_long_pause_reply_at = ?11, proactive_via_userbot = ?12, sleep_until = ?13,
            timezone_offset_minutes = ?14, memory_rev = ?15, pending_input_json = ?16,
            pending_started_at = ?17, pending_updated_at = ?18
         WHERE chat_id = ?1",
        params![
            state.chat_id,
            state.persona_key,
            state.auto_enabled as i64,
            state.last_user_msg_at.map(|d| d.to_rfc3339()),
            state.last_assistant_at.map(|d| d.to_rfc3339()),
            state.next_proactive_at.map(|d| d.to_rfc3339()),
            state.last_morning_sent_at.map(|d| d.to_rfc3339()),
            state.last_goodnight_sent_at.map(|d| d.to_rfc3339()),
            state.last_goodnight_followup_sent_at.map(|d| d.to_rfc3339()),
            state.last_reengage_sent_at.map(|d| d.to_rfc3339()),
            state.last_long_pause_reply_at.map(|d| d.to_rfc3339()),
            state.proactive_via_userbot as i64,
            state.sleep_until.map(|d| d.to_rfc3339()),
            state.timezone_offset_minutes,
            state.memory_rev,
            state.pending_input_json,
            state.pending_started_at.map(|d| d.to_rfc3339()),
            state.pending_updated_at.map(|d| d.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn row_to_chat_state(row: &Row) -> rusqlite::Result<ChatState> {
    Ok(ChatState {
        chat_id: row.get(0)?,
        persona_key: row.get(1)?,
        auto_enabled: row.get::<_, i64>(2)? != 0,
        last_user_msg_at: row.get::<_, Option<String>>(3)?.map(parse_dt),
        last_assistant_at: row.get::<_, Option<String>>(4)?.map(parse_dt),
        next_proactive_at: row.get::<_, Option<String>>(5)?.map(parse_dt),
        last_morning_sent_at: row.get::<_, Option<String>>(6)?.map(parse_dt),
        last_goodnight_sent_at: row.get::<_, Option<String>>(7)?.map(parse_dt),
        last_goodnight_followup_sent_at: row.get::<_, Option<String>>(8)?.map(parse_dt),
        last_reengage_sent_at: row.get::<_, Option<String>>(9)?.map(parse_dt),
        last_long_pause_reply_at: row.get::<_, Option<String>>(10)?.map(parse_dt),
        proactive_via_userbot: row.get::<_, i64>(11)? != 0,
        sleep_until: row.get::<_, Option<String>>(12)?.map(parse_dt),
        timezone_offset_minutes: row.get(13)?,
        memory_rev: row.get(14)?,
        pending_input_json: row.get(15)?,
        pending_started_at: row.get::<_, Option<String>>(16)?.map(parse_dt),
        pending_updated_at: row.get::<_, Option<String>>(17)?.map(parse_dt),
    })
}

fn row_to_outbox(row: &Row) -> rusqlite::Result<ProactiveOutboxRow> {
    let meta_raw: String = row.get(4)?;
    Ok(ProactiveOutboxRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        intent: row.get(2)?,
        text: row.get(3)?,
        meta: serde_json::from_str(&meta_raw).unwrap_or(serde_json::Value::Null),
        created_at: parse_dt(row.get::<_, String>(5)?),
        sent_at: row.get::<_, Option<String>>(6)?.map(parse_dt),
        attempts: row.get(7)?,
    })
}

pub(crate) fn parse_dt(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
