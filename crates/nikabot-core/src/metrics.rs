//! Process-wide metrics registry. Constructed once at startup and passed
//! by reference (`Arc<Metrics>`), per the "process-wide singletons"
//! guidance — no hidden global state, no re-registration after init.

use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    pub n8n_request_seconds: HistogramVec,
    pub messages_received_total: IntCounter,
    pub replies_sent_total: IntCounter,
    pub n8n_errors_total: IntCounterVec,
    pub proactive_sent_total: IntCounterVec,
    pub tasks_enqueued_total: IntCounterVec,
    pub tasks_completed_total: IntCounterVec,
    pub tasks_failed_total: IntCounterVec,
    pub reply_delay_seconds: HistogramVec,
    pub recovery_gap_messages_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let n8n_request_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "n8n_request_seconds",
                "Upstream workflow call latency in seconds",
            ),
            &["intent"],
        )?;
        let messages_received_total = IntCounter::new(
            "messages_received_total",
            "Inbound user messages processed by the turn processor",
        )?;
        let replies_sent_total = IntCounter::new(
            "replies_sent_total",
            "Assistant replies sent for a user turn",
        )?;
        let n8n_errors_total = IntCounterVec::new(
            Opts::new("n8n_errors_total", "Upstream call failures by class"),
            &["class"],
        )?;
        let proactive_sent_total = IntCounterVec::new(
            Opts::new("proactive_sent_total", "Proactive messages sent by intent"),
            &["intent"],
        )?;
        let tasks_enqueued_total = IntCounterVec::new(
            Opts::new("tasks_enqueued_total", "Tasks enqueued by kind"),
            &["kind"],
        )?;
        let tasks_completed_total = IntCounterVec::new(
            Opts::new("tasks_completed_total", "Tasks completed by kind"),
            &["kind"],
        )?;
        let tasks_failed_total = IntCounterVec::new(
            Opts::new("tasks_failed_total", "Tasks failed by kind"),
            &["kind"],
        )?;
        let reply_delay_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "reply_delay_seconds",
                "Computed reply-delay duration by delay kind",
            ),
            &["delay_kind"],
        )?;
        let recovery_gap_messages_total = IntCounter::new(
            "recovery_gap_messages_total",
            "Messages backfilled by transport recovery on startup",
        )?;

        registry.register(Box::new(n8n_request_seconds.clone()))?;
        registry.register(Box::new(messages_received_total.clone()))?;
        registry.register(Box::new(replies_sent_total.clone()))?;
        registry.register(Box::new(n8n_errors_total.clone()))?;
        registry.register(Box::new(proactive_sent_total.clone()))?;
        registry.register(Box::new(tasks_enqueued_total.clone()))?;
        registry.register(Box::new(tasks_completed_total.clone()))?;
        registry.register(Box::new(tasks_failed_total.clone()))?;
        registry.register(Box::new(reply_delay_seconds.clone()))?;
        registry.register(Box::new(recovery_gap_messages_total.clone()))?;

        Ok(Self {
            registry,
            n8n_request_seconds,
            messages_received_total,
            replies_sent_total,
            n8n_errors_total,
            proactive_sent_total,
            tasks_enqueued_total,
            tasks_completed_total,
            tasks_failed_total,
            reply_delay_seconds,
            recovery_gap_messages_total,
        })
    }

    /// Render the current snapshot in Prometheus text exposition format,
    /// for the `/metrics` HTTP handler.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails on a well-formed registry");
        String::from_utf8(buffer).expect("prometheus text output is always valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("static metric descriptors never collide")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_text_contains_registered_names() {
        let m = Metrics::default();
        m.messages_received_total.inc();
        let text = m.gather_text();
        assert!(text.contains("messages_received_total"));
    }
}
