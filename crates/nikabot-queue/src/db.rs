use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

pub fn init_db(conn: &Connection) -> Result<()> {
    configure_connection(conn)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending','processing','done','failed','cancelled')),
            priority INTEGER NOT NULL DEFAULT 100,
            payload_json TEXT NOT NULL DEFAULT '{}',
            attempts INTEGER NOT NULL DEFAULT 0,
            dedup_key TEXT UNIQUE,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            lease_expires_at TEXT,
            heartbeat_at TEXT,
            last_error TEXT
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_tasks_status_priority_created
            ON tasks (status, priority, created_at);
        CREATE INDEX IF NOT EXISTS idx_tasks_lease_expires_at ON tasks (lease_expires_at);",
    )?;
    Ok(())
}

/// This queue opens its own `rusqlite::Connection` against the same
/// `db_dsn` file `nikabot-store::Store` writes `chat_state`/history to
/// (see `nikabot-gateway::main`). A busy-timeout plus WAL journal mode
/// makes a concurrent write from the other connection retry-and-wait
/// instead of failing immediately with `SQLITE_BUSY`, so the
/// single-writer serialization DESIGN.md's Open Question 1 assumes
/// actually holds across both connections.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(())
}
