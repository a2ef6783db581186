//! Local-time `HH:MM-HH:MM` window parsing, shared by the turn processor's
//! quiet-hour gate and the proactive scheduler's morning/evening/quiet
//! checks. Overnight windows (`22:30-00:30`) are first-class.

/// A parsed local-time window, stored as minute-of-day offsets in `[0, 1440)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_min: u16,
    pub end_min: u16,
}

impl TimeWindow {
    /// Parses `"HH:MM-HH:MM"`. Returns `None` on any malformed input —
    /// callers treat an absent/invalid window as "no window configured".
    pub fn parse(raw: &str) -> Option<TimeWindow> {
        let (start, end) = raw.split_once('-')?;
        let start_min = parse_hhmm(start.trim())?;
        let end_min = parse_hhmm(end.trim())?;
        Some(TimeWindow { start_min, end_min })
    }

    /// Whether `minute_of_day` (`[0, 1440)`) falls inside the window.
    /// `start == end` is treated as "whole day" rather than "empty",
    /// matching the degenerate case the original's closures never guard
    /// against explicitly (a single instant window is not a realistic
    /// config, so the inclusive/whole-day reading is the safer default).
    pub fn contains(&self, minute_of_day: u16) -> bool {
        if self.start_min <= self.end_min {
            minute_of_day >= self.start_min && minute_of_day < self.end_min
        } else {
            // overnight wrap: e.g. 22:30-00:30
            minute_of_day >= self.start_min || minute_of_day < self.end_min
        }
    }

    /// Minutes remaining in the current occurrence of the window, given
    /// `minute_of_day` is already known to be inside it. Used to compute
    /// "end of quiet window" wake times.
    pub fn minutes_until_end(&self, minute_of_day: u16) -> u16 {
        if self.start_min <= self.end_min {
            self.end_min.saturating_sub(minute_of_day)
        } else if minute_of_day >= self.start_min {
            (1440 - minute_of_day) + self.end_min
        } else {
            self.end_min.saturating_sub(minute_of_day)
        }
    }
}

fn parse_hhmm(s: &str) -> Option<u16> {
    let (h, m) = s.split_once(':')?;
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if h >= 24 || m >= 60 {
        return None;
    }
    Some(h * 60 + m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_window() {
        let w = TimeWindow::parse("07:00-09:30").unwrap();
        assert_eq!(w.start_min, 420);
        assert_eq!(w.end_min, 570);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(TimeWindow::parse("not-a-window").is_none());
        assert!(TimeWindow::parse("25:00-09:30").is_none());
        assert!(TimeWindow::parse("07:00").is_none());
    }

    #[test]
    fn overnight_window_wraps() {
        let w = TimeWindow::parse("22:30-00:30").unwrap();
        assert!(w.contains(23 * 60));
        assert!(w.contains(0));
        assert!(w.contains(20));
        assert!(!w.contains(12 * 60));
    }

    #[test]
    fn simple_window_excludes_outside_range() {
        let w = TimeWindow::parse("00:30-07:00").unwrap();
        assert!(w.contains(70)); // 01:10
        assert!(!w.contains(8 * 60));
    }

    #[test]
    fn minutes_until_end_overnight() {
        let w = TimeWindow::parse("00:30-07:00").unwrap();
        // local 01:10 -> 5h50m = 350 minutes until 07:00
        assert_eq!(w.minutes_until_end(70), 350);
    }
}
