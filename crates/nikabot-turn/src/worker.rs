//! Task Queue worker loop (§4.7): leases `incoming_user_message` tasks —
//! today only the ones the startup recovery sweep enqueues for messages
//! that arrived while the transport was down — and drives each through
//! the Turn Processor exactly as a live webhook delivery would.
//!
//! Grounded on the teacher's scheduler tick-loop shape (interval +
//! `watch::Receiver<bool>` shutdown) already used by the proactive
//! scheduler and outbox pump, applied here to a lease/process/complete
//! cycle instead of a sweep.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use nikabot_core::Metrics;
use nikabot_queue::{IncomingUserMessage, LeaseOptions, TaskQueue, TaskStatus};

use crate::error::TurnError;
use crate::processor::{TurnInput, TurnProcessor};

const POLL_SECONDS: u64 = 2;
const INCOMING_USER_MESSAGE_KIND: &str = "incoming_user_message";

pub struct QueueWorker {
    queue: Arc<TaskQueue>,
    processor: Arc<TurnProcessor>,
    metrics: Arc<Metrics>,
    lease_options: LeaseOptions,
    heartbeat_seconds: u64,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<TaskQueue>,
        processor: Arc<TurnProcessor>,
        metrics: Arc<Metrics>,
        lease_seconds: i64,
        heartbeat_seconds: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            processor,
            metrics,
            lease_options: LeaseOptions {
                kinds: Some(vec![INCOMING_USER_MESSAGE_KIND.to_string()]),
                limit: 10,
                lease_seconds,
            },
            heartbeat_seconds: heartbeat_seconds.max(1) as u64,
        })
    }

    /// Drives the lease/process/complete cycle until `shutdown` signals true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("queue worker started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(POLL_SECONDS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("queue worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn poll(&self) {
        let leased = match self.queue.lease(&self.lease_options) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "queue worker: lease failed");
                return;
            }
        };

        for task in leased {
            self.process_one(task.id, task.payload, task.attempts).await;
        }
    }

    async fn process_one(&self, task_id: i64, payload: serde_json::Value, attempts: i64) {
        let message: IncomingUserMessage = match serde_json::from_value(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(task_id, error = %e, "queue worker: malformed incoming_user_message payload");
                let _ = self.queue.complete(task_id, TaskStatus::Failed, Some(&e.to_string()));
                self.metrics
                    .tasks_failed_total
                    .with_label_values(&[INCOMING_USER_MESSAGE_KIND])
                    .inc();
                return;
            }
        };

        let input = TurnInput {
            chat_id: message.chat_id,
            chat_type: message.chat_type,
            user_id: message.user_id,
            username: message.username,
            lang: message.lang,
            text: message.text,
            media: message.media,
            trace_id: message.trace_id,
            platform_msg_id: message.telegram_message_id,
        };

        // §4.7 "Heartbeat for long tasks every ≥10 s": keep the lease
        // alive for the duration of this task so the watchdog never
        // reclaims a task that's still legitimately in flight (e.g.
        // sleeping out an inline reply delay up to 30 s).
        let heartbeat_queue = Arc::clone(&self.queue);
        let lease_seconds = self.lease_options.lease_seconds;
        let heartbeat_interval = self.heartbeat_seconds;
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(heartbeat_interval));
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if let Err(e) = heartbeat_queue.heartbeat(task_id, lease_seconds) {
                    warn!(task_id, error = %e, "queue worker: heartbeat failed");
                }
            }
        });

        let result = self.processor.process_turn(input).await;
        heartbeat_handle.abort();

        match result {
            Ok(_) => {
                if let Err(e) = self.queue.complete(task_id, TaskStatus::Done, None) {
                    warn!(task_id, error = %e, "queue worker: failed to mark task done");
                } else {
                    self.metrics
                        .tasks_completed_total
                        .with_label_values(&[INCOMING_USER_MESSAGE_KIND])
                        .inc();
                }
            }
            Err(e) => self.handle_failure(task_id, attempts, e).await,
        }
    }

    /// Retries are reserved for upstream failures the client classifies
    /// as server-class (5xx/other); a client-class (4xx) failure, or any
    /// non-upstream error, is terminal on the first attempt — a retry
    /// would just fail in the same way.
    async fn handle_failure(&self, task_id: i64, attempts: i64, err: TurnError) {
        let retryable = matches!(&err, TurnError::Upstream(u) if u.is_retryable());
        warn!(task_id, attempts, error = %err, "queue worker: turn processing failed");

        if retryable && attempts < 5 {
            if let Err(e) = self.queue.return_to_pending(&[task_id]) {
                warn!(task_id, error = %e, "queue worker: failed to return task to pending");
            }
        } else {
            if let Err(e) = self.queue.complete(task_id, TaskStatus::Failed, Some(&err.to_string())) {
                warn!(task_id, error = %e, "queue worker: failed to mark task failed");
            }
            self.metrics
                .tasks_failed_total
                .with_label_values(&[INCOMING_USER_MESSAGE_KIND])
                .inc();
        }
    }
}

/// Periodic `TaskQueue::watchdog_pass` driver (§4.7 "watchdog"): reclaims
/// leases a crashed or stuck worker never released.
pub async fn run_watchdog(queue: Arc<TaskQueue>, interval_seconds: i64, mut shutdown: watch::Receiver<bool>) {
    info!("queue watchdog started");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1) as u64));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match queue.watchdog_pass() {
                    Ok(stats) if stats.returned > 0 || stats.failed > 0 => {
                        info!(returned = stats.returned, failed = stats.failed, "queue watchdog pass");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "queue watchdog: pass failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("queue watchdog shutting down");
                    break;
                }
            }
        }
    }
}
