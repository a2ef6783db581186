//! Per-chat quoting state (§4.10 "shared transport obligations"): a ring
//! of the last 20 user message ids plus a reply counter that fires a
//! quote every `N ∈ [10,15]` replies, threshold redrawn each cycle.
//!
//! Process-local and best-effort — a restart resets every chat to an
//! empty ring and a fresh threshold, which only degrades the "every so
//! often" quoting cadence, never corrupts state.

use std::collections::VecDeque;

use dashmap::DashMap;
use rand::Rng;

const RING_CAPACITY: usize = 20;
const THRESHOLD_MIN: u32 = 10;
const THRESHOLD_MAX: u32 = 15;

struct ChatQuoteState {
    recent_user_msg_ids: VecDeque<i64>,
    replies_since_quote: u32,
    threshold: u32,
}

impl ChatQuoteState {
    fn fresh() -> Self {
        Self {
            recent_user_msg_ids: VecDeque::with_capacity(RING_CAPACITY),
            replies_since_quote: 0,
            threshold: random_threshold(),
        }
    }
}

fn random_threshold() -> u32 {
    rand::thread_rng().gen_range(THRESHOLD_MIN..=THRESHOLD_MAX)
}

/// Process-local, per-chat ring of recent user message ids and the reply
/// counter deciding when the next reply should quote one of them.
pub struct QuoteRing {
    chats: DashMap<i64, ChatQuoteState>,
}

impl QuoteRing {
    pub fn new() -> Self {
        Self {
            chats: DashMap::new(),
        }
    }

    /// Records a platform message id for `chat_id`, evicting the oldest
    /// entry once the ring exceeds [`RING_CAPACITY`].
    pub fn record_user_message(&self, chat_id: i64, platform_msg_id: i64) {
        let mut state = self.chats.entry(chat_id).or_insert_with(ChatQuoteState::fresh);
        if state.recent_user_msg_ids.len() == RING_CAPACITY {
            state.recent_user_msg_ids.pop_front();
        }
        state.recent_user_msg_ids.push_back(platform_msg_id);
    }

    /// Called once per outbound reply. Returns the message id to quote
    /// when this reply crosses the chat's threshold, resetting the
    /// counter and redrawing a fresh uniform threshold for the next cycle.
    pub fn next_reply_to(&self, chat_id: i64) -> Option<i64> {
        let mut state = self.chats.entry(chat_id).or_insert_with(ChatQuoteState::fresh);
        state.replies_since_quote += 1;
        if state.replies_since_quote < state.threshold {
            return None;
        }
        state.replies_since_quote = 0;
        state.threshold = random_threshold();
        state.recent_user_msg_ids.back().copied()
    }
}

impl Default for QuoteRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = QuoteRing::new();
        for i in 0..25 {
            ring.record_user_message(1, i);
        }
        let state = ring.chats.get(&1).unwrap();
        assert_eq!(state.recent_user_msg_ids.len(), RING_CAPACITY);
        assert_eq!(state.recent_user_msg_ids.front().copied(), Some(5));
    }

    #[test]
    fn quote_fires_within_configured_bounds() {
        let ring = QuoteRing::new();
        ring.record_user_message(1, 42);
        let mut fired_at = None;
        for i in 1..=THRESHOLD_MAX {
            if ring.next_reply_to(1).is_some() {
                fired_at = Some(i);
                break;
            }
        }
        let fired_at = fired_at.expect("quote must fire by the max threshold");
        assert!((THRESHOLD_MIN..=THRESHOLD_MAX).contains(&fired_at));
    }

    #[test]
    fn quote_chooses_last_recorded_id() {
        let ring = QuoteRing::new();
        ring.record_user_message(7, 1);
        ring.record_user_message(7, 2);
        ring.record_user_message(7, 3);
        for _ in 0..THRESHOLD_MAX {
            if let Some(id) = ring.next_reply_to(7) {
                assert_eq!(id, 3);
                return;
            }
        }
        panic!("quote never fired");
    }

    #[test]
    fn counter_resets_and_redraws_after_firing() {
        let ring = QuoteRing::new();
        ring.record_user_message(3, 1);
        let mut quotes = 0;
        for _ in 0..(THRESHOLD_MAX * 3) {
            if ring.next_reply_to(3).is_some() {
                quotes += 1;
            }
        }
        assert!(quotes >= 2, "expected the cycle to repeat, got {quotes} quotes");
    }
}
