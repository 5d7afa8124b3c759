//! Retry policy contract and the generic exponential-backoff implementation.

use std::time::Duration;

use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Pure contract over attempt history: given the attempt number and the
/// elapsed time since the first attempt, return the delay before the next
/// attempt, or `None` if the policy considers the event exhausted.
///
/// Implementations must be deterministic given their configuration: the same
/// `(attempt, elapsed)` pair must always produce the same answer. State that
/// changes between calls (the attempt counter, the elapsed-time clock)
/// belongs to [`RetryExecution`], not to the policy itself.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before `attempt` (0-indexed), or `None` once the
    /// policy is exhausted.
    fn next(&self, attempt: u32, elapsed: Duration) -> Option<Duration>;
}

/// Exponential backoff configured by `{initial_interval, interval_multiplier,
/// max_interval, max_attempts, max_elapsed_time}`, matching the retry
/// configuration surface.
///
/// Produces `initial_interval * interval_multiplier^attempt`, clamped to
/// `max_interval`, capped by both `max_attempts` (total retries after the
/// first free attempt) and `max_elapsed_time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenericRetry {
    pub initial_interval: Duration,
    pub interval_multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub max_elapsed_time: Duration,
}

impl Default for GenericRetry {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            interval_multiplier: 2.0,
            max_interval: Duration::from_secs(30),
            max_attempts: 10,
            max_elapsed_time: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy for GenericRetry {
    fn next(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if attempt > self.max_attempts || elapsed >= self.max_elapsed_time {
            return None;
        }

        let retry_ordinal = attempt - 1;
        let raw_millis = self.initial_interval.as_millis() as f64
            * self.interval_multiplier.powi(retry_ordinal as i32);
        let delay_millis = raw_millis.min(self.max_interval.as_millis() as f64);
        Some(Duration::from_millis(delay_millis.max(0.0) as u64))
    }
}

/// Stateful per-event wrapper around a [`RetryPolicy`]: tracks how many
/// attempts have been made and when the first attempt started.
///
/// Also implements [`backoff::backoff::Backoff`] so a `RetryExecution` can be
/// used directly with code written against the wider `backoff` ecosystem.
#[derive(Debug, Clone)]
pub struct RetryExecution {
    policy: std::sync::Arc<dyn RetryPolicy>,
    attempt: u32,
    started_at: Instant,
}

impl RetryExecution {
    /// Starts a fresh execution clock against `policy`. The first call to
    /// [`RetryExecution::next_delay`] always yields a zero delay.
    pub fn new(policy: std::sync::Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            attempt: 0,
            started_at: Instant::now(),
        }
    }

    /// Returns the delay before the next attempt, or `None` if the policy is
    /// exhausted. Does not advance the attempt counter; call
    /// [`RetryExecution::advance`] once the attempt is actually dispatched.
    pub fn next_delay(&self) -> Option<Duration> {
        self.policy.next(self.attempt, self.started_at.elapsed())
    }

    /// Records that an attempt was dispatched, advancing the attempt
    /// counter for the next call to [`RetryExecution::next_delay`].
    pub fn advance(&mut self) {
        self.attempt += 1;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Backoff for RetryExecution {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.next_delay()?;
        self.advance();
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
        self.started_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_zero_delay() {
        let policy = GenericRetry::default();
        assert_eq!(policy.next(0, Duration::ZERO), Some(Duration::ZERO));
    }

    #[test]
    fn delay_grows_monotonically_until_clamped() {
        let policy = GenericRetry {
            initial_interval: Duration::from_millis(100),
            interval_multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            max_attempts: 20,
            max_elapsed_time: Duration::from_secs(600),
        };
        let d1 = policy.next(1, Duration::ZERO).unwrap();
        let d2 = policy.next(2, Duration::ZERO).unwrap();
        let d3 = policy.next(3, Duration::ZERO).unwrap();
        assert!(d2 >= d1);
        assert!(d3 >= d2);
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(400));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let policy = GenericRetry {
            max_attempts: 2,
            ..GenericRetry::default()
        };
        assert!(policy.next(1, Duration::ZERO).is_some());
        assert!(policy.next(2, Duration::ZERO).is_some());
        assert!(policy.next(3, Duration::ZERO).is_none());
    }

    #[test]
    fn exhausts_after_max_elapsed_time() {
        let policy = GenericRetry {
            max_elapsed_time: Duration::from_secs(10),
            ..GenericRetry::default()
        };
        assert!(policy.next(1, Duration::from_secs(5)).is_some());
        assert!(policy.next(1, Duration::from_secs(11)).is_none());
    }

    #[test]
    fn clamps_to_max_interval() {
        let policy = GenericRetry {
            initial_interval: Duration::from_millis(1000),
            interval_multiplier: 10.0,
            max_interval: Duration::from_secs(5),
            max_attempts: 20,
            max_elapsed_time: Duration::from_secs(600),
        };
        let delay = policy.next(5, Duration::ZERO).unwrap();
        assert_eq!(delay, Duration::from_secs(5));
    }
}
