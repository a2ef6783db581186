use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle (§3 invariant 4): `pending -> processing -> {done,
/// failed, cancelled}`; `processing -> pending` only via the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A durable work item (§3, §4.7). The only kind consumed by the core
/// engine is `incoming_user_message`, but the table is kind-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub kind: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub payload: serde_json::Value,
    pub attempts: i64,
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Payload shape for the `incoming_user_message` task kind (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingUserMessage {
    pub telegram_message_id: Option<i64>,
    pub chat_id: i64,
    pub chat_type: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub lang: Option<String>,
    pub text: String,
    pub media: Option<serde_json::Value>,
    pub trace_id: Option<String>,
    pub source: String,
}

/// Options for [`crate::queue::TaskQueue::lease`], mirroring the
/// original's `lease_tasks(kinds=None, limit=10, lease_seconds=60)`
/// keyword defaults.
#[derive(Debug, Clone)]
pub struct LeaseOptions {
    pub kinds: Option<Vec<String>>,
    pub limit: i64,
    pub lease_seconds: i64,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            kinds: None,
            limit: 10,
            lease_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchdogStats {
    pub returned: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_display_and_from_str() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let rendered = s.to_string();
            assert_eq!(TaskStatus::from_str(&rendered).unwrap(), s);
        }
    }

    #[test]
    fn from_str_rejects_unknown_status() {
        assert!(TaskStatus::from_str("bogus").is_err());
    }
}
