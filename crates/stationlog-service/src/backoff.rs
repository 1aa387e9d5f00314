//! Backoff policy for sub-attempts within a collection cycle.
//!
//! The collector owns every retry; the cloud client and sources make exactly
//! one attempt per call.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use stationlog_service::BackoffPolicy;
//!
//! let policy = BackoffPolicy::default().jitter(false);
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(30));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
//!
//! // A rate-limit hint wins when it is longer.
//! let hinted = policy.next_delay(0, Some(Duration::from_secs(120)));
//! assert_eq!(hinted, Duration::from_secs(120));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::config::CollectorConfig;

/// Retry policy for one collection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Sub-attempts per cycle, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Multiplier applied per further attempt.
    pub factor: f64,
    /// Longest computed delay.
    pub max_delay: Duration,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            factor: 2.0,
            max_delay: Duration::from_secs(600),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Policy from the `[collector]` section.
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.backoff_base_secs),
            factor: config.backoff_factor,
            max_delay: Duration::from_secs(config.backoff_cap_secs),
            jitter: true,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the cap.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay after failed attempt `attempt` (0-based):
    /// `min(base * factor^attempt, cap)`, plus jitter when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };

        let delay = if self.jitter {
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Delay before the next attempt, honoring a rate-limit hint when it is
    /// longer than the computed backoff.
    pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.delay_for_attempt(attempt);
        match retry_after {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(30));
        assert_eq!(policy.max_delay, Duration::from_secs(600));
        assert!(policy.jitter);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy::default().jitter(false);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(600));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(75));
        }
    }

    #[test]
    fn test_retry_after_hint() {
        let policy = BackoffPolicy::default().jitter(false);
        assert_eq!(
            policy.next_delay(0, Some(Duration::from_secs(5))),
            Duration::from_secs(30)
        );
        assert_eq!(
            policy.next_delay(0, Some(Duration::from_secs(900))),
            Duration::from_secs(900)
        );
        assert_eq!(policy.next_delay(1, None), Duration::from_secs(60));
    }

    #[test]
    fn test_from_config() {
        let config = CollectorConfig {
            max_attempts: 5,
            backoff_base_secs: 10,
            backoff_factor: 3.0,
            backoff_cap_secs: 60,
            ..Default::default()
        };
        let policy = BackoffPolicy::from_config(&config).jitter(false);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = BackoffPolicy::none();
        assert!(policy.has_attempts_left(0));
        assert!(!policy.has_attempts_left(1));

        let policy = BackoffPolicy::default().max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }
}
