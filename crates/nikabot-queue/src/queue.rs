use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{QueueError, Result};
use crate::types::{LeaseOptions, Task, TaskStatus, WatchdogStats};

const MAX_ATTEMPTS: i64 = 5;

/// Table-backed priority+age queue (§4.7). Holding the whole select+update
/// cycle inside one transaction on a mutex-guarded single connection is
/// this crate's substitute for Postgres's `SELECT ... FOR UPDATE SKIP
/// LOCKED`: with exactly one writer, no other worker can observe (let
/// alone lease) a row between the select and the status flip, which is
/// the property `SKIP LOCKED` exists to provide for multi-writer Postgres.
pub struct TaskQueue {
    conn: Mutex<rusqlite::Connection>,
}

impl TaskQueue {
    pub fn new(conn: rusqlite::Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(rusqlite::Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(rusqlite::Connection::open_in_memory()?)
    }

    /// Enqueues a task. A `dedup_key` collision is a silent no-op that
    /// returns the id of the already-enqueued task (§3 invariant 3).
    pub fn enqueue(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        priority: i64,
        dedup_key: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO tasks (kind, status, priority, payload_json, dedup_key, created_at)
             VALUES (?1, 'pending', ?2, ?3, ?4, ?5)
             ON CONFLICT(dedup_key) DO NOTHING",
            params![kind, priority, serde_json::to_string(payload)?, dedup_key, now],
        )?;

        if inserted > 0 {
            return Ok(conn.last_insert_rowid());
        }

        // Conflict: dedup_key already present. Look the existing row up.
        let Some(key) = dedup_key else {
            // No dedup_key and `inserted == 0` can't happen without a
            // conflict target, but guard defensively rather than panic.
            return Ok(conn.last_insert_rowid());
        };
        conn.query_row(
            "SELECT id FROM tasks WHERE dedup_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .map_err(QueueError::from)
    }

    /// Atomically selects up to `limit` pending rows (optionally filtered
    /// by kind) ordered by priority then age, flips them to `processing`,
    /// and returns them.
    pub fn lease(&self, opts: &LeaseOptions) -> Result<Vec<Task>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let lease_expires = now + Duration::seconds(opts.lease_seconds);

        let ids: Vec<i64> = {
            let mut sql = String::from(
                "SELECT id FROM tasks WHERE status = 'pending'",
            );
            if let Some(kinds) = &opts.kinds {
                if kinds.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = kinds
                    .iter()
                    .map(|_| "?")
                    .collect::<Vec<_>>()
                    .join(",");
                sql.push_str(&format!(" AND kind IN ({placeholders})"));
            }
            sql.push_str(" ORDER BY priority ASC, created_at ASC LIMIT ?");

            let mut stmt = tx.prepare(&sql)?;
            let rows = if let Some(kinds) = &opts.kinds {
                let mut params_vec: Vec<&dyn rusqlite::ToSql> =
                    kinds.iter().map(|k| k as &dyn rusqlite::ToSql).collect();
                params_vec.push(&opts.limit);
                stmt.query_map(params_vec.as_slice(), |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                stmt.query_map(params![opts.limit], |row| row.get::<_, i64>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            rows
        };

        let mut leased = Vec::with_capacity(ids.len());
        for id in ids {
            tx.execute(
                "UPDATE tasks SET
                    status = 'processing',
                    started_at = COALESCE(started_at, ?2),
                    lease_expires_at = ?3,
                    heartbeat_at = ?2,
                    attempts = attempts + 1
                 WHERE id = ?1",
                params![id, now.to_rfc3339(), lease_expires.to_rfc3339()],
            )?;
            leased.push(fetch_task_tx(&tx, id)?.ok_or(QueueError::TaskNotFound { id })?);
        }

        tx.commit()?;
        Ok(leased)
    }

    pub fn heartbeat(&self, task_id: i64, lease_seconds: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let lease_expires = now + Duration::seconds(lease_seconds);
        conn.execute(
            "UPDATE tasks SET heartbeat_at = ?2, lease_expires_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![task_id, now.to_rfc3339(), lease_expires.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn complete(&self, task_id: i64, status: TaskStatus, error: Option<&str>) -> Result<()> {
        if !matches!(status, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(QueueError::InvalidStatus(status.to_string()));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?2, finished_at = ?3, last_error = ?4 WHERE id = ?1",
            params![task_id, status.to_string(), Utc::now().to_rfc3339(), error],
        )?;
        Ok(())
    }

    pub fn return_to_pending(&self, task_ids: &[i64]) -> Result<()> {
        if task_ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = task_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "UPDATE tasks SET status = 'pending', lease_expires_at = NULL, heartbeat_at = NULL
             WHERE status = 'processing' AND id IN ({placeholders})"
        );
        let params_vec: Vec<&dyn rusqlite::ToSql> =
            task_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        conn.execute(&sql, params_vec.as_slice())?;
        Ok(())
    }

    /// Recovers tasks stuck in `processing` past their lease. Tasks at or
    /// beyond `MAX_ATTEMPTS` are marked `failed` instead of retried.
    pub fn watchdog_pass(&self) -> Result<WatchdogStats> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let expired: Vec<(i64, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT id, attempts FROM tasks
                 WHERE status = 'processing' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1",
            )?;
            stmt.query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        };

        let mut stats = WatchdogStats::default();
        for (id, attempts) in expired {
            if attempts >= MAX_ATTEMPTS {
                conn.execute(
                    "UPDATE tasks SET status = 'failed', finished_at = ?2, last_error = 'max attempts exceeded'
                     WHERE id = ?1",
                    params![id, now],
                )?;
                stats.failed += 1;
            } else {
                conn.execute(
                    "UPDATE tasks SET status = 'pending', lease_expires_at = NULL, heartbeat_at = NULL
                     WHERE id = ?1",
                    params![id],
                )?;
                stats.returned += 1;
            }
        }
        Ok(stats)
    }

    pub fn get(&self, task_id: i64) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, kind, status, priority, payload_json, attempts, dedup_key, created_at,
                    started_at, finished_at, lease_expires_at, heartbeat_at, last_error
             FROM tasks WHERE id = ?1",
            params![task_id],
            row_to_task,
        )
        .optional()
        .map_err(QueueError::from)
    }
}

fn fetch_task_tx(tx: &rusqlite::Transaction, id: i64) -> Result<Option<Task>> {
    tx.query_row(
        "SELECT id, kind, status, priority, payload_json, attempts, dedup_key, created_at,
                started_at, finished_at, lease_expires_at, heartbeat_at, last_error
         FROM tasks WHERE id = ?1",
        params![id],
        row_to_task,
    )
    .optional()
    .map_err(QueueError::from)
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(2)?;
    let payload_raw: String = row.get(4)?;
    Ok(Task {
        id: row.get(0)?,
        kind: row.get(1)?,
        status: status_raw.parse().unwrap_or(TaskStatus::Pending),
        priority: row.get(3)?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null),
        attempts: row.get(5)?,
        dedup_key: row.get(6)?,
        created_at: parse_dt(row.get(7)?),
        started_at: row.get::<_, Option<String>>(8)?.map(parse_dt),
        finished_at: row.get::<_, Option<String>>(9)?.map(parse_dt),
        lease_expires_at: row.get::<_, Option<String>>(10)?.map(parse_dt),
        heartbeat_at: row.get::<_, Option<String>>(11)?.map(parse_dt),
        last_error: row.get(12)?,
    })
}

fn parse_dt(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dedup_key_is_idempotent() {
        let q = TaskQueue::open_in_memory().unwrap();
        let id1 = q
            .enqueue("incoming_user_message", &serde_json::json!({}), 100, Some("k1"))
            .unwrap();
        let id2 = q
            .enqueue("incoming_user_message", &serde_json::json!({}), 100, Some("k1"))
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn lease_flips_status_and_increments_attempts() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue("incoming_user_message", &serde_json::json!({}), 100, None)
            .unwrap();
        let leased = q.lease(&LeaseOptions::default()).unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].status, TaskStatus::Processing);
        assert_eq!(leased[0].attempts, 1);

        // a second lease call sees nothing pending left
        let leased_again = q.lease(&LeaseOptions::default()).unwrap();
        assert!(leased_again.is_empty());
    }

    #[test]
    fn complete_rejects_invalid_status() {
        let q = TaskQueue::open_in_memory().unwrap();
        let id = q
            .enqueue("incoming_user_message", &serde_json::json!({}), 100, None)
            .unwrap();
        assert!(q.complete(id, TaskStatus::Pending, None).is_err());
        assert!(q.complete(id, TaskStatus::Done, None).is_ok());
    }

    #[test]
    fn watchdog_returns_expired_leases_and_fails_exhausted() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue("incoming_user_message", &serde_json::json!({}), 100, Some("a"))
            .unwrap();
        q.lease(&LeaseOptions {
            lease_seconds: -1,
            ..LeaseOptions::default()
        })
        .unwrap();

        let stats = q.watchdog_pass().unwrap();
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn lease_respects_priority_and_age_order() {
        let q = TaskQueue::open_in_memory().unwrap();
        q.enqueue("k", &serde_json::json!({}), 200, Some("low"))
            .unwrap();
        q.enqueue("k", &serde_json::json!({}), 100, Some("high"))
            .unwrap();
        let leased = q
            .lease(&LeaseOptions {
                limit: 1,
                ..LeaseOptions::default()
            })
            .unwrap();
        assert_eq!(leased[0].dedup_key.as_deref(), Some("high"));
    }
}
