//! Retry policy for managed transactions

use crate::connection::config::RetryConfig;
use std::time::Duration;

/// Exponent cap keeping `base * 2^n` well inside `Duration` range
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy that runs every unit of work exactly once
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Total attempts allowed (at least one)
    pub fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt` (1-based)
    pub fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// `base * 2^(attempt-1)` plus uniform jitter in `[0, base)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::random::<u64>() % base_ms
        };
        self.exponential(attempt) + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(delay_ms: u64) -> RetryPolicy {
        RetryPolicy::from(&RetryConfig {
            enabled: true,
            max_attempts: 5,
            delay_ms,
        })
    }

    #[test]
    fn test_backoff_grows_exponentially_within_jitter() {
        let policy = policy(100);
        for attempt in 1..=4u32 {
            let floor = Duration::from_millis(100 * 2u64.pow(attempt - 1));
            for _ in 0..20 {
                let delay = policy.backoff(attempt);
                assert!(delay >= floor, "attempt {attempt}: {delay:?}");
                assert!(delay < floor + Duration::from_millis(100), "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_zero_base_has_no_delay() {
        assert_eq!(policy(0).backoff(3), Duration::ZERO);
    }

    #[test]
    fn test_attempts() {
        assert_eq!(policy(10).attempts(), 5);
        assert_eq!(RetryPolicy::disabled().attempts(), 1);
        let zero = RetryPolicy {
            max_attempts: 0,
            ..policy(10)
        };
        assert_eq!(zero.attempts(), 1);
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let delay = policy(100).exponential(200);
        assert_eq!(delay, Duration::from_millis(100 * (1 << MAX_BACKOFF_EXPONENT)));
    }
}
