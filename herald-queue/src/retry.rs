//! Exponential backoff between delivery attempts.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

/// How long a failed message waits before its next attempt.
///
/// The delay after the `n`th failure is `base * 2^(n - 1)`, capped at
/// `max_delay`. With a non-zero `jitter_factor` the delay is then moved by a
/// random amount within `±jitter_factor` of itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(86_400),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// The unjittered delay after `attempts` failures (1-indexed).
    #[must_use]
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);

        let delay = if exponent >= 32 {
            self.max_delay
        } else {
            self.base_delay.saturating_mul(1u32 << exponent)
        };

        delay.min(self.max_delay)
    }

    /// The delay after `attempts` failures, with jitter applied.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        let delay = self.backoff(attempts);

        if self.jitter_factor <= 0.0 {
            return delay;
        }

        let factor = self.jitter_factor.min(1.0);
        let spread = delay.as_secs_f64() * factor;
        let jitter: f64 = rand::rng().random_range(-spread..=spread);

        Duration::try_from_secs_f64((delay.as_secs_f64() + jitter).max(0.0)).unwrap_or(delay)
    }

    /// When a message that has now failed `attempts` times may be retried.
    #[must_use]
    pub fn next_retry_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.delay(attempts))
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn policy(base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = policy(1000);

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            jitter_factor: 0.0,
        };

        assert_eq!(policy.backoff(4), Duration::from_secs(480));
        assert_eq!(policy.backoff(5), Duration::from_secs(600));
        assert_eq!(policy.backoff(40), Duration::from_secs(600));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_zero_attempts_treated_as_first() {
        assert_eq!(policy(500).backoff(0), Duration::from_millis(500));
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let policy = policy(1000);
        assert_eq!(policy.delay(3), policy.backoff(3));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..policy(10_000)
        };

        for _ in 0..100 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_secs(8), "{delay:?} too short");
            assert!(delay <= Duration::from_secs(12), "{delay:?} too long");
        }
    }

    #[test]
    fn test_next_retry_at() {
        let now = Utc::now();
        let at = policy(1000).next_retry_at(2, now);
        assert_eq!(at - now, TimeDelta::seconds(2));
    }
}
