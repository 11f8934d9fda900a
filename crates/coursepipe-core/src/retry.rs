//! Retry scheduling: exponential backoff with a ceiling, shared by both queue
//! instantiations.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default cap on the backoff delay in seconds.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Default number of attempts before a job is handed to `fail_terminally`.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay in seconds before the first retry; doubles on each attempt.
    pub base_delay_secs: u64,
    /// Ceiling on the computed delay.
    pub max_delay_secs: u64,
    /// Attempts past this count fail terminally instead of rescheduling.
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: MAX_RETRY_BACKOFF_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// Backoff delay for a given attempt count (exponential with cap).
    pub fn delay(&self, attempt: i32) -> Duration {
        let attempt = attempt.max(0) as u32;
        let secs = self
            .base_delay_secs
            .checked_mul(2_u64.saturating_pow(attempt))
            .unwrap_or(self.max_delay_secs)
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }

    /// Decide whether a job on its `attempt`-th dispatch should be retried.
    pub fn decide(&self, attempt: i32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay: self.delay(attempt),
            }
        }
    }

    /// Earliest next eligibility time for the given attempt count.
    pub fn next_run_at(&self, attempt: i32) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(self.delay(attempt)).unwrap_or(chrono::Duration::seconds(self.max_delay_secs as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_then_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(8), Duration::from_secs(256));
        assert_eq!(policy.delay(9), Duration::from_secs(MAX_RETRY_BACKOFF_SECS));
        assert_eq!(policy.delay(63), Duration::from_secs(MAX_RETRY_BACKOFF_SECS));
        assert_eq!(policy.delay(1000), Duration::from_secs(MAX_RETRY_BACKOFF_SECS));
    }

    #[test]
    fn backoff_is_monotone_up_to_the_ceiling() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous, "delay regressed at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn exceeding_max_attempts_gives_up() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(matches!(policy.decide(0), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(2), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(10), RetryDecision::GiveUp);
    }

    #[test]
    fn negative_attempts_are_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(-1), Duration::from_secs(1));
    }
}
