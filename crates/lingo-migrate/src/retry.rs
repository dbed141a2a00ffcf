//! Retry policy for queued jobs.
//!
//! Independent of any queue: the worker asks the policy whether and when to
//! retry a job whose attempt failed with a retryable error.

use std::time::Duration;

/// Default attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// How many times to try a job and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after every failed attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            backoff,
        }
    }

    /// Returns true if another attempt may follow a failed `attempt` (1-based).
    #[must_use]
    pub const fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Returns the delay after a failed `attempt`.
    #[must_use]
    pub const fn delay_after(&self, _attempt: u32) -> Duration {
        self.backoff
    }
}
