//! Abuse moderation gate (§4.6 step 11): a flagged turn never mutes the
//! chat by itself — only a burst of flags within a rolling window
//! triggers an automatic mute, per spec.md's "DO NOT mute immediately".

/// Whether `events_in_window` flagged turns within the configured window
/// meets or exceeds the auto-block threshold.
pub fn should_auto_block(events_in_window: i64, max_in_window: i64) -> bool {
    events_in_window >= max_in_window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_at_threshold() {
        assert!(should_auto_block(10, 10));
        assert!(should_auto_block(11, 10));
    }

    #[test]
    fn does_not_block_below_threshold() {
        assert!(!should_auto_block(9, 10));
    }
}
