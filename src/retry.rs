//! Caller-side retries.
//!
//! The client never retries on its own: a repeated `submit` could start the
//! same operation twice. Wrap idempotent calls in [`with_backoff`] instead.

use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::util::backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or the
/// attempts are used up. Delays grow by 1.5x between attempts.
pub fn with_backoff<T, F>(policy: RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1usize;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::warn!(attempt, error = %e, ?delay, "retrying");
                thread::sleep(delay);
                delay = backoff(delay, policy.max_delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
