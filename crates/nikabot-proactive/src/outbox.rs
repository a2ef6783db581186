//! Outbox (C9, §4.9): FIFO delivery of proactive messages queued by the
//! scheduler for chats routed through the userbot transport. Polled on
//! its own ~10 s cadence, independent of the 60 s scheduler sweep.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use nikabot_core::Metrics;
use nikabot_store::Store;
use nikabot_turn::sender::OutboundSender;

use crate::error::Result;

const POLL_SECONDS: u64 = 10;
const BATCH_LIMIT: i64 = 20;

pub struct OutboxPump {
    store: Arc<Store>,
    sender: Arc<dyn OutboundSender>,
    metrics: Arc<Metrics>,
}

impl OutboxPump {
    pub fn new(store: Arc<Store>, sender: Arc<dyn OutboundSender>, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            store,
            sender,
            metrics,
        })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("outbox pump started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(POLL_SECONDS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.pump().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox pump shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Delivers up to [`BATCH_LIMIT`] pending rows, oldest first. A send
    /// failure only bumps `attempts` — there is no dead-letter queue
    /// beyond the attempt counter (§4.9).
    pub async fn pump(&self) {
        let rows = match self.store.list_pending_outbox(BATCH_LIMIT) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to list pending outbox rows");
                return;
            }
        };
        for row in rows {
            if let Err(e) = self.deliver(&row).await {
                warn!(outbox_id = row.id, error = %e, "outbox delivery failed");
            }
        }
    }

    async fn deliver(&self, row: &nikabot_store::ProactiveOutboxRow) -> Result<()> {
        match self.sender.send_text(row.chat_id, &row.text, None).await {
            Ok(_) => {
                self.store.save_assistant_message(row.chat_id, &row.text, &row.meta, None)?;
                self.store.update_chat_state(row.chat_id, |s| {
                    s.last_assistant_at = Some(Utc::now());
                })?;
                self.store.mark_outbox_sent(row.id)?;
                self.metrics
                    .proactive_sent_total
                    .with_label_values(&[row.intent.as_str()])
                    .inc();
            }
            Err(_) => {
                self.store.increment_outbox_attempts(row.id)?;
            }
        }
        Ok(())
    }
}
