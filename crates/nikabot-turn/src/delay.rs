//! Reply-delay policy (§4.6 step 12): priority-ordered selection between
//! a deterministic long pause after inactivity, a rare probabilistic long
//! delay, a media-origin override, or the normal jittered delay.

use chrono::{DateTime, Utc};
use nikabot_core::config::ReplyDelayConfig;

#[derive(Debug, Clone, Copy)]
pub enum MediaDelayOrigin {
    Photo,
    Voice { duration_secs: Option<f64> },
}

#[derive(Debug, Clone, Copy)]
pub struct DelayInputs {
    pub now: DateTime<Utc>,
    pub prev_user_ts: Option<DateTime<Utc>>,
    pub last_assistant_at: Option<DateTime<Utc>>,
    pub last_long_pause_reply_at: Option<DateTime<Utc>>,
    pub media_origin: Option<MediaDelayOrigin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayKind {
    InactivityLong,
    RareLong,
    Photo,
    Voice,
    Normal,
}

impl DelayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayKind::InactivityLong => "inactivity_long",
            DelayKind::RareLong => "rare_long",
            DelayKind::Photo => "photo",
            DelayKind::Voice => "voice",
            DelayKind::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DelayDecision {
    pub seconds: i64,
    pub kind: DelayKind,
    /// Whether the caller should stamp `last_long_pause_reply_at = now`
    /// — set only when the inactivity-long branch fired, so the
    /// deterministic long delay applies once per pause episode rather
    /// than on every message until the next real gap.
    pub mark_long_pause: bool,
}

fn prev_activity(inputs: &DelayInputs) -> Option<DateTime<Utc>> {
    match (inputs.prev_user_ts, inputs.last_assistant_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

pub fn compute_delay(cfg: &ReplyDelayConfig, inputs: &DelayInputs) -> DelayDecision {
    if let Some(activity) = prev_activity(inputs) {
        let minutes_since = (inputs.now - activity).num_minutes();
        let applies = minutes_since >= cfg.inactivity_long_threshold_minutes
            && match inputs.last_long_pause_reply_at {
                None => true,
                Some(marked) => activity > marked,
            };
        if applies {
            return DelayDecision {
                seconds: nikabot_core::clock::jitter_seconds(
                    cfg.inactivity_long_min_seconds,
                    cfg.inactivity_long_max_seconds,
                ),
                kind: DelayKind::InactivityLong,
                mark_long_pause: true,
            };
        }
    }

    if cfg.rare_long_probability > 0.0 {
        let roll: f64 = rand::random();
        if roll < cfg.rare_long_probability {
            return DelayDecision {
                seconds: nikabot_core::clock::jitter_seconds(
                    cfg.rare_long_min_seconds,
                    cfg.rare_long_max_seconds,
                ),
                kind: DelayKind::RareLong,
                mark_long_pause: false,
            };
        }
    }

    if let Some(origin) = inputs.media_origin {
        match origin {
            MediaDelayOrigin::Photo => {
                return DelayDecision {
                    seconds: nikabot_core::clock::jitter_seconds(
                        cfg.photo_delay_min_seconds,
                        cfg.photo_delay_max_seconds,
                    ),
                    kind: DelayKind::Photo,
                    mark_long_pause: false,
                };
            }
            MediaDelayOrigin::Voice { duration_secs } => {
                let base = duration_secs.unwrap_or(0.0).clamp(1.5, 120.0);
                let extra = nikabot_core::clock::jitter_seconds(
                    cfg.voice_delay_extra_min_seconds,
                    cfg.voice_delay_extra_max_seconds,
                ) as f64;
                return DelayDecision {
                    seconds: (base + extra).round() as i64,
                    kind: DelayKind::Voice,
                    mark_long_pause: false,
                };
            }
        }
    }

    DelayDecision {
        seconds: nikabot_core::clock::jitter_seconds(cfg.min_seconds, cfg.max_seconds),
        kind: DelayKind::Normal,
        mark_long_pause: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> ReplyDelayConfig {
        ReplyDelayConfig {
            min_seconds: 5,
            max_seconds: 10,
            rare_long_probability: 0.0,
            rare_long_min_seconds: 180,
            rare_long_max_seconds: 360,
            inactivity_long_threshold_minutes: 120,
            inactivity_long_min_seconds: 180,
            inactivity_long_max_seconds: 300,
            photo_delay_min_seconds: 5,
            photo_delay_max_seconds: 6,
            voice_delay_extra_min_seconds: 2,
            voice_delay_extra_max_seconds: 4,
        }
    }

    #[test]
    fn normal_delay_when_no_special_condition() {
        let now = Utc::now();
        let d = compute_delay(
            &cfg(),
            &DelayInputs {
                now,
                prev_user_ts: Some(now - Duration::seconds(30)),
                last_assistant_at: None,
                last_long_pause_reply_at: None,
                media_origin: None,
            },
        );
        assert_eq!(d.kind, DelayKind::Normal);
        assert!((5..=10).contains(&d.seconds));
    }

    #[test]
    fn inactivity_long_fires_after_threshold() {
        let now = Utc::now();
        let d = compute_delay(
            &cfg(),
            &DelayInputs {
                now,
                prev_user_ts: Some(now - Duration::minutes(200)),
                last_assistant_at: None,
                last_long_pause_reply_at: None,
                media_origin: None,
            },
        );
        assert_eq!(d.kind, DelayKind::InactivityLong);
        assert!(d.mark_long_pause);
        assert!((180..=300).contains(&d.seconds));
    }

    #[test]
    fn inactivity_long_does_not_reapply_within_same_pause_episode() {
        let now = Utc::now();
        let activity = now - Duration::minutes(200);
        let d = compute_delay(
            &cfg(),
            &DelayInputs {
                now,
                prev_user_ts: Some(activity),
                last_assistant_at: None,
                last_long_pause_reply_at: Some(activity + Duration::seconds(1)),
                media_origin: None,
            },
        );
        assert_ne!(d.kind, DelayKind::InactivityLong);
    }

    #[test]
    fn media_override_does_not_apply_over_inactivity_long() {
        let now = Utc::now();
        let d = compute_delay(
            &cfg(),
            &DelayInputs {
                now,
                prev_user_ts: Some(now - Duration::minutes(200)),
                last_assistant_at: None,
                last_long_pause_reply_at: None,
                media_origin: Some(MediaDelayOrigin::Photo),
            },
        );
        assert_eq!(d.kind, DelayKind::InactivityLong);
    }

    #[test]
    fn photo_override_applies_over_normal() {
        let now = Utc::now();
        let d = compute_delay(
            &cfg(),
            &DelayInputs {
                now,
                prev_user_ts: Some(now - Duration::seconds(5)),
                last_assistant_at: None,
                last_long_pause_reply_at: None,
                media_origin: Some(MediaDelayOrigin::Photo),
            },
        );
        assert_eq!(d.kind, DelayKind::Photo);
        assert!((5..=6).contains(&d.seconds));
    }

    #[test]
    fn voice_delay_clamps_duration() {
        let now = Utc::now();
        let d = compute_delay(
            &cfg(),
            &DelayInputs {
                now,
                prev_user_ts: Some(now - Duration::seconds(5)),
                last_assistant_at: None,
                last_long_pause_reply_at: None,
                media_origin: Some(MediaDelayOrigin::Voice {
                    duration_secs: Some(500.0),
                }),
            },
        );
        assert_eq!(d.kind, DelayKind::Voice);
        // clamp(500, 1.5, 120) + [2,4] => [122, 124]
        assert!((122..=124).contains(&d.seconds));
    }
}
