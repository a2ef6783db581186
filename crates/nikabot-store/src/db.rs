use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// Idempotent schema creation. Safe to call on every process start.
pub fn init_db(conn: &Connection) -> Result<()> {
    configure_connection(conn)?;
    create_chats_table(conn)?;
    create_users_table(conn)?;
    create_messages_table(conn)?;
    create_assistant_messages_table(conn)?;
    create_chat_state_table(conn)?;
    create_events_table(conn)?;
    create_proactive_outbox_table(conn)?;
    Ok(())
}

/// `nikabot-queue`'s `TaskQueue` opens a second `rusqlite::Connection`
/// against the same `db_dsn` file (see `nikabot-queue/src/db.rs`), so two
/// writer connections exist in the process even though DESIGN.md's Open
/// Question 1 treats each as a single mutexed writer. A busy-timeout plus
/// WAL journal mode makes a concurrent write retry-and-wait instead of
/// failing immediately with `SQLITE_BUSY`, so that single-writer
/// assumption holds in practice across both connections.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(())
}

fn create_chats_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chats (
            id INTEGER PRIMARY KEY,
            chat_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        ) STRICT;",
    )?;
    Ok(())
}

fn create_users_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT,
            lang TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        ) STRICT;",
    )?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL,
            user_id INTEGER,
            text TEXT NOT NULL,
            platform_msg_id INTEGER,
            created_at TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages (chat_id);
        CREATE INDEX IF NOT EXISTS idx_messages_platform_msg_id ON messages (platform_msg_id);",
    )?;
    Ok(())
}

fn create_assistant_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS assistant_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL,
            text TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            platform_msg_id INTEGER,
            created_at TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_assistant_messages_chat_id ON assistant_messages (chat_id);
        CREATE INDEX IF NOT EXISTS idx_assistant_messages_platform_msg_id ON assistant_messages (platform_msg_id);",
    )?;
    Ok(())
}

fn create_chat_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chat_state (
            chat_id INTEGER PRIMARY KEY,
            persona_key TEXT NOT NULL DEFAULT 'nika',
            auto_enabled INTEGER NOT NULL DEFAULT 1,
            last_user_msg_at TEXT,
            last_assistant_at TEXT,
            next_proactive_at TEXT,
            last_morning_sent_at TEXT,
            last_goodnight_sent_at TEXT,
            last_goodnight_followup_sent_at TEXT,
            last_reengage_sent_at TEXT,
            last_long_pause_reply_at TEXT,
            proactive_via_userbot INTEGER NOT NULL DEFAULT 0,
            sleep_until TEXT,
            timezone_offset_minutes INTEGER NOT NULL DEFAULT 180,
            memory_rev INTEGER NOT NULL DEFAULT 1,
            pending_input_json TEXT,
            pending_started_at TEXT,
            pending_updated_at TEXT
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_chat_state_next_proactive_at ON chat_state (next_proactive_at);",
    )?;
    Ok(())
}

fn create_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            chat_id INTEGER,
            user_id INTEGER,
            payload_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_events_chat_id_kind ON events (chat_id, kind);",
    )?;
    Ok(())
}

fn create_proactive_outbox_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS proactive_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL,
            intent TEXT NOT NULL,
            text TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            sent_at TEXT,
            attempts INTEGER NOT NULL DEFAULT 0
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_proactive_outbox_chat_id ON proactive_outbox (chat_id);",
    )?;
    Ok(())
}
