//! Usage-limit policy: cooldown between runs and daily soft/hard caps.
//!
//! This module is pure. [`RateLimitCounters`] is the persisted per-caller
//! record; [`RateLimitCounters::evaluate`] turns it into a
//! [`RateLimitDecision`] under a [`RateLimitPolicy`]. Loading, saving and
//! serialising access to the counters is the job of the rate-limiter service in
//! the `nodes` crate.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::{DayKey, GenerationError, Timestamp};

/// Limits applied to one caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Minimum time between two successful runs.
    pub cooldown: Duration,
    /// Daily count from which the caller must consent before each run.
    pub soft_cap: u32,
    /// Daily count above which the consent prompt uses stronger wording.
    pub escalation_threshold: u32,
    /// Daily count at which runs are refused outright.
    pub hard_cap: u32,
    /// Offset used to decide which calendar day "today" is.
    pub utc_offset: FixedOffset,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10),
            soft_cap: 30,
            escalation_threshold: 50,
            hard_cap: 100,
            utc_offset: Utc.fix(),
        }
    }
}

/// Why a run was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDenial {
    /// The previous run finished less than `cooldown` ago.
    CooldownActive {
        /// Whole seconds left, rounded up.
        seconds_remaining: u64,
    },
    /// Today's count has reached the hard cap.
    DailyCapReached {
        /// Today's count.
        daily_count: u32,
    },
}

impl From<RateLimitDenial> for GenerationError {
    fn from(denial: RateLimitDenial) -> Self {
        match denial {
            RateLimitDenial::CooldownActive { seconds_remaining } => {
                GenerationError::RateLimitCooldown { seconds_remaining }
            }
            RateLimitDenial::DailyCapReached { daily_count } => {
                GenerationError::RateLimitDailyCap { daily_count }
            }
        }
    }
}

/// Result of checking the counters before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Proceed.
    Allowed,
    /// Proceed only if the caller confirms.
    RequiresConsent {
        /// Today's count.
        daily_count: u32,
        /// Whether the stronger warning applies.
        escalated: bool,
    },
    /// Refuse.
    Denied(RateLimitDenial),
}

/// Persisted per-caller usage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCounters {
    /// Completion time of the last successful run.
    pub last_invocation_at: Option<Timestamp>,
    /// Successful runs on `day_key`.
    pub daily_count: u32,
    /// Day the count belongs to.
    pub day_key: DayKey,
}

impl RateLimitCounters {
    /// Counters for a caller with no history.
    pub fn fresh(today: DayKey) -> Self {
        Self {
            last_invocation_at: None,
            daily_count: 0,
            day_key: today,
        }
    }

    /// Resets the daily count if `today` is a different day. Returns `true` if
    /// a reset happened. `last_invocation_at` is kept so the cooldown still
    /// applies across midnight.
    pub fn roll_over(&mut self, today: DayKey) -> bool {
        if self.day_key == today {
            return false;
        }
        self.daily_count = 0;
        self.day_key = today;
        true
    }

    /// Decides whether a run may start at `now`. Expects [`Self::roll_over`]
    /// to have been applied for `now` already.
    ///
    /// The hard cap wins over the cooldown; the cooldown wins over consent.
    pub fn evaluate(&self, now: Timestamp, policy: &RateLimitPolicy) -> RateLimitDecision {
        if self.daily_count >= policy.hard_cap {
            return RateLimitDecision::Denied(RateLimitDenial::DailyCapReached {
                daily_count: self.daily_count,
            });
        }

        if let Some(last) = self.last_invocation_at {
            let cooldown_ms = i64::try_from(policy.cooldown.as_millis()).unwrap_or(i64::MAX);
            let elapsed_ms = now.since(last).num_milliseconds().max(0);
            if elapsed_ms < cooldown_ms {
                let remaining_ms = cooldown_ms - elapsed_ms;
                let seconds_remaining = u64::try_from((remaining_ms + 999) / 1000).unwrap_or(0);
                return RateLimitDecision::Denied(RateLimitDenial::CooldownActive {
                    seconds_remaining,
                });
            }
        }

        if self.daily_count >= policy.soft_cap {
            return RateLimitDecision::RequiresConsent {
                daily_count: self.daily_count,
                escalated: self.daily_count > policy.escalation_threshold,
            };
        }

        RateLimitDecision::Allowed
    }

    /// Applies one successful run completed at `now`.
    pub fn record_success(&mut self, now: Timestamp, policy: &RateLimitPolicy) {
        self.roll_over(now.day_key(policy.utc_offset));
        self.last_invocation_at = Some(now);
        self.daily_count = self.daily_count.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> Timestamp {
        Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 7, 14, 12, 0, 0).unwrap())
    }

    fn counters(last_secs_ago: Option<i64>, daily_count: u32) -> RateLimitCounters {
        let policy = RateLimitPolicy::default();
        RateLimitCounters {
            last_invocation_at: last_secs_ago.map(|s| now().minus(chrono::Duration::seconds(s))),
            daily_count,
            day_key: now().day_key(policy.utc_offset),
        }
    }

    #[test]
    fn cooldown_reports_rounded_up_seconds() {
        let policy = RateLimitPolicy::default();
        assert_eq!(
            counters(Some(5), 0).evaluate(now(), &policy),
            RateLimitDecision::Denied(RateLimitDenial::CooldownActive {
                seconds_remaining: 5
            })
        );

        let mut c = counters(None, 0);
        c.last_invocation_at = Some(now().minus(chrono::Duration::milliseconds(4_200)));
        assert_eq!(
            c.evaluate(now(), &policy),
            RateLimitDecision::Denied(RateLimitDenial::CooldownActive {
                seconds_remaining: 6
            })
        );
    }

    #[test]
    fn cooldown_expires_exactly_at_window() {
        let policy = RateLimitPolicy::default();
        assert_eq!(
            counters(Some(10), 0).evaluate(now(), &policy),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn hard_cap_wins_over_cooldown() {
        let policy = RateLimitPolicy::default();
        assert_eq!(
            counters(Some(1), 100).evaluate(now(), &policy),
            RateLimitDecision::Denied(RateLimitDenial::DailyCapReached { daily_count: 100 })
        );
        assert_eq!(
            counters(None, 100).evaluate(now(), &policy),
            RateLimitDecision::Denied(RateLimitDenial::DailyCapReached { daily_count: 100 })
        );
    }

    #[test]
    fn soft_cap_requires_consent_and_escalates_above_threshold() {
        let policy = RateLimitPolicy::default();
        assert_eq!(
            counters(None, 29).evaluate(now(), &policy),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            counters(None, 30).evaluate(now(), &policy),
            RateLimitDecision::RequiresConsent {
                daily_count: 30,
                escalated: false
            }
        );
        assert_eq!(
            counters(None, 50).evaluate(now(), &policy),
            RateLimitDecision::RequiresConsent {
                daily_count: 50,
                escalated: false
            }
        );
        assert_eq!(
            counters(None, 99).evaluate(now(), &policy),
            RateLimitDecision::RequiresConsent {
                daily_count: 99,
                escalated: true
            }
        );
    }

    #[test]
    fn roll_over_resets_count_but_keeps_last_invocation() {
        let policy = RateLimitPolicy::default();
        let mut c = counters(Some(3), 100);
        let tomorrow = now().plus(chrono::Duration::days(1)).day_key(policy.utc_offset);
        assert!(c.roll_over(tomorrow));
        assert_eq!(c.daily_count, 0);
        assert!(c.last_invocation_at.is_some());
        assert!(!c.roll_over(tomorrow));
    }

    #[test]
    fn record_success_increments_and_stamps() {
        let policy = RateLimitPolicy::default();
        let mut c = counters(None, 7);
        c.record_success(now(), &policy);
        assert_eq!(c.daily_count, 8);
        assert_eq!(c.last_invocation_at, Some(now()));
    }

    #[test]
    fn record_success_on_new_day_starts_at_one() {
        let policy = RateLimitPolicy::default();
        let mut c = counters(None, 42);
        let next_day = now().plus(chrono::Duration::days(1));
        c.record_success(next_day, &policy);
        assert_eq!(c.daily_count, 1);
        assert_eq!(c.day_key, next_day.day_key(policy.utc_offset));
    }
}
