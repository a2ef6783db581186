//! Debounce Buffer (C5, §4.5): coalesces fragmented inbound messages
//! (e.g. a photo followed a second later by its caption-as-text) into a
//! single logical turn before handing off to the Turn Processor.
//!
//! The buffer payload lives in `chat_state.pending_input_json` — the
//! database deadline is authoritative (§9 Open Questions); the in-memory
//! per-chat timer is a best-effort accelerator that the DB-backed
//! `flush_if_expired` path backstops on process restart.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use nikabot_store::{PendingInput, PendingMedia, Store};

use crate::error::Result;

pub const INITIAL_SECONDS: i64 = 10;
pub const EXTENSION_SECONDS: i64 = 6;
pub const ABSOLUTE_MAX_SECONDS: i64 = 30;

/// A raw inbound fragment (text, voice, or photo) handed to [`DebounceBuffer::append`].
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub chat_type: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub lang: Option<String>,
    pub text: String,
    pub media: Option<PendingMedia>,
    pub trace_id: Option<String>,
}

/// The aggregated payload handed to the Turn Processor once a buffer flushes.
#[derive(Debug, Clone)]
pub struct FlushedTurn {
    pub chat_id: i64,
    pub chat_type: String,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub lang: Option<String>,
    pub text: String,
    pub media: Option<PendingMedia>,
    pub trace_id: Option<String>,
}

/// Implemented by whoever owns the Turn Processor, so the buffer can
/// hand off a flushed payload without depending on the processor type.
#[async_trait]
pub trait TurnFlusher: Send + Sync + 'static {
    async fn flush_turn(&self, turn: FlushedTurn);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    BufferStarted,
    Extended,
    FlushedAndStarted,
}

/// Per-chat aggregation state machine (§4.5).
pub struct DebounceBuffer<F: TurnFlusher> {
    store: Arc<Store>,
    flusher: Arc<F>,
    timers: DashMap<i64, tokio::task::JoinHandle<()>>,
}

impl<F: TurnFlusher> DebounceBuffer<F> {
    pub fn new(store: Arc<Store>, flusher: Arc<F>) -> Arc<Self> {
        Arc::new(Self {
            store,
            flusher,
            timers: DashMap::new(),
        })
    }

    /// Appends an inbound fragment to the chat's pending buffer, per the
    /// priority-ordered rules in §4.5.
    pub async fn append(self: &Arc<Self>, event: InboundEvent) -> Result<AppendOutcome> {
        let chat_id = event.chat_id;
        let now = Utc::now();
        let existing = self
            .store
            .get_chat_state(chat_id)?
            .and_then(|s| s.pending());

        let is_photo_event = matches!(
            event.media.as_ref().map(|m| &m.origin),
            Some(nikabot_store::MediaOrigin::Photo)
        );

        let should_flush_then_start = match &existing {
            None => false,
            Some(pending) => {
                let pending_has_photo = matches!(
                    pending.media.as_ref().map(|m| &m.origin),
                    Some(nikabot_store::MediaOrigin::Photo)
                );
                (is_photo_event && pending_has_photo)
                    || now >= pending.absolute_deadline_at
                    || now >= pending.deadline_at
            }
        };

        if existing.is_none() {
            self.start_new(chat_id, &event, now).await?;
            return Ok(AppendOutcome::BufferStarted);
        }

        if should_flush_then_start {
            self.flush(chat_id).await?;
            self.start_new(chat_id, &event, now).await?;
            return Ok(AppendOutcome::FlushedAndStarted);
        }

        let pending = existing.expect("checked Some above");
        self.extend(chat_id, pending, &event, now).await?;
        Ok(AppendOutcome::Extended)
    }

    async fn start_new(&self, chat_id: i64, event: &InboundEvent, now: DateTime<Utc>) -> Result<()> {
        let deadline_at = now + Duration::seconds(INITIAL_SECONDS);
        let absolute_deadline_at = now + Duration::seconds(ABSOLUTE_MAX_SECONDS);
        let payload = PendingInput {
            text: event.text.trim().to_string(),
            media: event.media.clone(),
            started_at: now,
            deadline_at,
            absolute_deadline_at,
            user_id: event.user_id,
            username: event.username.clone(),
            lang: event.lang.clone(),
            chat_type: event.chat_type.clone(),
            flushing: false,
        };
        self.store.set_pending(chat_id, &payload)?;
        self.schedule_timer(chat_id, deadline_at);
        Ok(())
    }

    async fn extend(
        &self,
        chat_id: i64,
        mut pending: PendingInput,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !pending.text.is_empty() && !event.text.trim().is_empty() {
            pending.text = format!("{} {}", pending.text, event.text.trim());
        } else if pending.text.is_empty() {
            pending.text = event.text.trim().to_string();
        }
        if pending.media.is_none() {
            pending.media = event.media.clone();
        }
        let candidate = now + Duration::seconds(EXTENSION_SECONDS);
        pending.deadline_at = candidate.min(pending.absolute_deadline_at);
        self.store.set_pending(chat_id, &pending)?;
        self.schedule_timer(chat_id, pending.deadline_at);
        Ok(())
    }

    /// Cancels any existing timer for `chat_id` and schedules a new one
    /// at `deadline_at`, calling [`Self::flush_if_expired`] when it fires.
    fn schedule_timer(self: &Arc<Self>, chat_id: i64, deadline_at: DateTime<Utc>) {
        if let Some((_, old)) = self.timers.remove(&chat_id) {
            old.abort();
        }
        let delay = (deadline_at - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.flush_if_expired(chat_id).await {
                warn!(chat_id, error = %e, "debounce timer flush failed");
            }
        });
        self.timers.insert(chat_id, handle);
    }

    /// Flushes only when a deadline has actually passed — called by the
    /// background timer and, defensively, on next inbound append after a
    /// process restart (§4.5, §9).
    pub async fn flush_if_expired(self: &Arc<Self>, chat_id: i64) -> Result<()> {
        let Some(state) = self.store.get_chat_state(chat_id)? else {
            return Ok(());
        };
        let Some(pending) = state.pending() else {
            return Ok(());
        };
        let now = Utc::now();
        if now >= pending.deadline_at || now >= pending.absolute_deadline_at {
            self.flush(chat_id).await?;
        }
        Ok(())
    }

    /// Flushes the pending buffer for `chat_id`. Idempotent: a second
    /// concurrent caller observes `_flushing=true` (already claimed) or
    /// an empty pending buffer (already flushed) and returns without
    /// action — the CAS-style mark-then-clear sequence defends against
    /// the timer and a live append racing to flush the same buffer.
    pub async fn flush(self: &Arc<Self>, chat_id: i64) -> Result<()> {
        let Some(state) = self.store.get_chat_state(chat_id)? else {
            return Ok(());
        };
        let Some(mut pending) = state.pending() else {
            return Ok(());
        };
        if pending.flushing {
            debug!(chat_id, "buffer already flushing, skipping duplicate flush");
            return Ok(());
        }
        pending.flushing = true;
        self.store.set_pending(chat_id, &pending)?;

        self.store.clear_pending(chat_id)?;
        if let Some((_, handle)) = self.timers.remove(&chat_id) {
            handle.abort();
        }

        let turn = FlushedTurn {
            chat_id,
            chat_type: pending.chat_type,
            user_id: pending.user_id,
            username: pending.username,
            lang: pending.lang,
            text: pending.text,
            media: pending.media,
            trace_id: None,
        };
        self.flusher.flush_turn(turn).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingFlusher {
        flushed: std::sync::Mutex<Vec<FlushedTurn>>,
    }

    impl RecordingFlusher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                flushed: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TurnFlusher for RecordingFlusher {
        async fn flush_turn(&self, turn: FlushedTurn) {
            self.flushed.lock().unwrap().push(turn);
        }
    }

    fn event(chat_id: i64, text: &str) -> InboundEvent {
        InboundEvent {
            chat_id,
            chat_type: "private".to_string(),
            user_id: Some(1),
            username: Some("alice".to_string()),
            lang: Some("en".to_string()),
            text: text.to_string(),
            media: None,
            trace_id: None,
        }
    }

    async fn fresh_buffer() -> (Arc<Store>, Arc<DebounceBuffer<RecordingFlusher>>, Arc<RecordingFlusher>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.ensure_entities(1, "private", Some(1), Some("alice"), Some("en"), true).unwrap();
        let flusher = RecordingFlusher::new();
        let buffer = DebounceBuffer::new(Arc::clone(&store), Arc::clone(&flusher));
        (store, buffer, flusher)
    }

    #[tokio::test]
    async fn first_append_starts_buffer() {
        let (store, buffer, _flusher) = fresh_buffer().await;
        let outcome = buffer.append(event(1, "hello")).await.unwrap();
        assert_eq!(outcome, AppendOutcome::BufferStarted);
        let state = store.get_chat_state(1).unwrap().unwrap();
        assert!(state.pending().is_some());
    }

    #[tokio::test]
    async fn second_append_extends_and_concatenates_text() {
        let (store, buffer, _flusher) = fresh_buffer().await;
        buffer.append(event(1, "look")).await.unwrap();
        let outcome = buffer.append(event(1, "at this")).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Extended);
        let pending = store.get_chat_state(1).unwrap().unwrap().pending().unwrap();
        assert_eq!(pending.text, "look at this");
    }

    #[tokio::test]
    async fn manual_flush_clears_pending_and_invokes_flusher() {
        let (store, buffer, flusher) = fresh_buffer().await;
        buffer.append(event(1, "hi")).await.unwrap();
        buffer.flush(1).await.unwrap();
        let state = store.get_chat_state(1).unwrap().unwrap();
        assert!(state.pending().is_none());
        assert_eq!(flusher.flushed.lock().unwrap().len(), 1);
        assert_eq!(flusher.flushed.lock().unwrap()[0].text, "hi");
    }

    #[tokio::test]
    async fn double_flush_is_idempotent() {
        let (_store, buffer, flusher) = fresh_buffer().await;
        buffer.append(event(1, "hi")).await.unwrap();
        buffer.flush(1).await.unwrap();
        buffer.flush(1).await.unwrap();
        assert_eq!(flusher.flushed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_photo_flushes_then_starts_new_buffer() {
        let (store, buffer, flusher) = fresh_buffer().await;
        let mut photo_event = event(1, "");
        photo_event.media = Some(PendingMedia {
            origin: nikabot_store::MediaOrigin::Photo,
            image_url: Some("https://x/1.jpg".to_string()),
            image_file_id: None,
            image_mime_type: None,
            width: None,
            height: None,
            audio_url: None,
            voice_file_id: None,
            mime_type: None,
            duration: None,
        });
        buffer.append(photo_event.clone()).await.unwrap();

        let mut second_photo = photo_event.clone();
        second_photo.media.as_mut().unwrap().image_url = Some("https://x/2.jpg".to_string());
        let outcome = buffer.append(second_photo).await.unwrap();

        assert_eq!(outcome, AppendOutcome::FlushedAndStarted);
        assert_eq!(flusher.flushed.lock().unwrap().len(), 1);
        let state = store.get_chat_state(1).unwrap().unwrap();
        assert!(state.pending().is_some());
    }

    #[tokio::test]
    async fn flush_if_expired_is_noop_before_deadline() {
        let (store, buffer, flusher) = fresh_buffer().await;
        buffer.append(event(1, "hi")).await.unwrap();
        buffer.flush_if_expired(1).await.unwrap();
        assert_eq!(flusher.flushed.lock().unwrap().len(), 0);
        assert!(store.get_chat_state(1).unwrap().unwrap().pending().is_some());
    }
}
