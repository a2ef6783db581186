//! Monotonic-enough wall clock plus uniform jitter, as consumed by the
//! reply-delay policy and the proactive scheduler.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Current UTC instant. A thin wrapper so call sites read `clock::now()`
/// rather than sprinkling `Utc::now()` everywhere — keeps the single
/// substitution point if a test ever needs to fake time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `base + uniform_int[lo, hi]` seconds. Swaps an inverted range instead
/// of panicking — callers sometimes derive `lo`/`hi` from config that a
/// careless operator set backwards.
pub fn future_with_jitter(lo: i64, hi: i64, base: DateTime<Utc>) -> DateTime<Utc> {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let secs = if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    };
    base + Duration::seconds(secs)
}

/// Same jitter, but returns only the delay, not an absolute instant —
/// used by the reply-delay policy where callers need the raw second count
/// to decide between the inline/detached send paths.
pub fn jitter_seconds(lo: i64, hi: i64) -> i64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if lo == hi {
        lo
    } else {
        rand::thread_rng().gen_range(lo..=hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_within_bounds() {
        let base = Utc::now();
        for _ in 0..200 {
            let f = future_with_jitter(5, 10, base);
            let delta = (f - base).num_seconds();
            assert!((5..=10).contains(&delta), "delta={delta}");
        }
    }

    #[test]
    fn jitter_swaps_inverted_range() {
        let base = Utc::now();
        let f = future_with_jitter(10, 5, base);
        let delta = (f - base).num_seconds();
        assert!((5..=10).contains(&delta));
    }

    #[test]
    fn jitter_seconds_equal_bounds_is_constant() {
        assert_eq!(jitter_seconds(7, 7), 7);
    }
}
