//! Exponential backoff for store retries.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`. Each
//! attempt derives its delay from the attempt number alone.

use std::time::Duration;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 100ms doubling up to 10s.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Bounded retry: at most `max_attempts` tries, spaced by `backoff`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(1),
            factor,
        }
    }

    #[test]
    fn attempt_zero_returns_first() {
        assert_eq!(policy(2.0).next(0), Duration::from_millis(100));
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let p = policy(2.0);
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_secs(1));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn unit_factor_is_constant() {
        let p = policy(1.0);
        assert_eq!(p.next(0), p.next(50));
    }
}
