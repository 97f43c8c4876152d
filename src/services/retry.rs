//! Bounded retry with exponential backoff for ledger write conflicts
//!
//! Ledger operations run on blocking threads (diesel is synchronous), so the
//! backoff sleeps the current thread. Only errors for which
//! [`ProgressError::is_retryable`] holds are retried; after the last attempt
//! the error is surfaced as `Conflict` so callers can re-issue the request
//! with the same idempotency key.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::ProgressError;

/// Upper bound for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }

    /// Backoff before retry number `attempt` (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T, ProgressError>
    where
        F: FnMut() -> Result<T, ProgressError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let backoff = self.backoff_for_attempt(attempt);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Write conflict, retrying"
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(operation, attempts = self.max_attempts, error = %e, "Write conflict persisted");
                    return Err(match e {
                        ProgressError::Conflict(_) => e,
                        other => ProgressError::Conflict(format!("{}: {}", operation, other)),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        assert_eq!(policy.backoff_for_attempt(0), Duration::from_millis(10));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(40));
        assert_eq!(policy.backoff_for_attempt(30), MAX_BACKOFF);
    }

    #[test]
    fn test_retries_conflicts_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Cell::new(0);
        let result = policy.run("complete_lesson", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProgressError::Conflict("version moved".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_with_conflict() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = Cell::new(0);
        let result: Result<(), _> = policy.run("complete_lesson", || {
            calls.set(calls.get() + 1);
            Err(ProgressError::Conflict("version moved".into()))
        });
        assert!(matches!(result, Err(ProgressError::Conflict(_))));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_validation_errors_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let calls = Cell::new(0);
        let result: Result<(), _> = policy.run("complete_lesson", || {
            calls.set(calls.get() + 1);
            Err(ProgressError::InvalidInput("score".into()))
        });
        assert!(matches!(result, Err(ProgressError::InvalidInput(_))));
        assert_eq!(calls.get(), 1);
    }
}
