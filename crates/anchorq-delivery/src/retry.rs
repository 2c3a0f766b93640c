//! Exponential backoff scheduling for failed queue entries.
//!
//! Queue-level retries are slow and deliberate: the gap between attempt
//! series doubles from a one minute base, so a flaky anchoring service is
//! probed less and less often while entries stay durable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy for queue entries.
///
/// The delay before retry `n` (1-based over the attempt counter) is
/// `base_delay * 2^(n-1)`, capped to avoid overflow on runaway counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts before the entry fails terminally.
    pub max_attempts: i32,

    /// Base delay for the exponential backoff calculation.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
        }
    }
}

/// Outcome of a retry decision for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry no earlier than the given time.
    Retry {
        /// When the next attempt becomes eligible.
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry; the entry permanently fails.
    GiveUp {
        /// Why the entry should not be retried.
        reason: String,
    },
}

impl RetryPolicy {
    /// Computes the backoff delay after the given number of attempts.
    ///
    /// `attempts` is the entry's counter after the failed attempt, so the
    /// first failure yields the base delay, the second double that, and so
    /// on. The exponent is capped so the multiplication cannot overflow.
    pub fn next_delay(&self, attempts: i32) -> Duration {
        let exponent = u32::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        self.base_delay * multiplier
    }

    /// Decides whether a failed attempt earns another try.
    ///
    /// Gives up when the attempt budget is spent or the error is not
    /// retryable; otherwise schedules the next window from the failure
    /// time.
    pub fn decide(
        &self,
        attempts: i32,
        error: &DeliveryError,
        failed_at: DateTime<Utc>,
    ) -> RetryDecision {
        if attempts >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        if !error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {error}"),
            };
        }

        let delay = self.next_delay(attempts);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: failed_at + chrono_delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_minute() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(1), Duration::from_secs(60));
        assert_eq!(policy.next_delay(2), Duration::from_secs(120));
        assert_eq!(policy.next_delay(3), Duration::from_secs(240));
        assert_eq!(policy.next_delay(4), Duration::from_secs(480));
    }

    #[test]
    fn zero_and_negative_attempts_use_base_delay() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.next_delay(0), Duration::from_secs(60));
        assert_eq!(policy.next_delay(-3), Duration::from_secs(60));
    }

    #[test]
    fn retry_scheduled_from_failure_time() {
        let policy = RetryPolicy::default();
        let failed_at = Utc::now();

        match policy.decide(1, &DeliveryError::timeout(30), failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                assert_eq!(next_attempt_at, failed_at + chrono::Duration::seconds(60));
            },
            RetryDecision::GiveUp { .. } => {
                unreachable!("first failure of a retryable error must be retried");
            },
        }
    }

    #[test]
    fn gives_up_at_maximum_attempts() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };

        match policy.decide(3, &DeliveryError::timeout(30), Utc::now()) {
            RetryDecision::GiveUp { reason } => {
                assert!(reason.contains("maximum attempts"));
            },
            RetryDecision::Retry { .. } => {
                unreachable!("must give up once the budget is spent");
            },
        }
    }

    #[test]
    fn non_retryable_errors_rejected() {
        let policy = RetryPolicy::default();

        match policy.decide(1, &DeliveryError::serialization("bad payload"), Utc::now()) {
            RetryDecision::GiveUp { reason } => {
                assert!(reason.contains("non-retryable"));
            },
            RetryDecision::Retry { .. } => {
                unreachable!("serialization failures are deterministic");
            },
        }
    }

    #[test]
    fn exponent_capped_for_large_counters() {
        let policy = RetryPolicy { max_attempts: i32::MAX, ..Default::default() };

        let delay = policy.next_delay(1000);
        assert_eq!(delay, Duration::from_secs(60) * 2_u32.pow(20));
    }
}
