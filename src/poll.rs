//! Polling of long-running processes and operations.
//!
//! The decision logic lives in [`Poller`], a small state machine that is fed
//! every observed status and answers with the next step. It never sleeps, so
//! async callers can drive it with their own timer:
//!
//! ```no_run
//! # use slipo::{PollPolicy, Poller, PollStep, Status};
//! # fn query() -> Status { Status::Running }
//! let mut poller = Poller::new(PollPolicy::default());
//! loop {
//!     match poller.observe(query()) {
//!         PollStep::Done(status) => break,
//!         PollStep::Wait(d) => std::thread::sleep(d), // or an async sleep
//!         PollStep::TimedOut { .. } => break,
//!     }
//! }
//! ```
//!
//! [`crate::Client::poll_until_terminal`] is the blocking driver.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::process::Status;
use crate::util::backoff;

/// Cooperative cancellation for a waiting poller.
///
/// Cancelling only abandons the wait; the remote job keeps running. Use
/// [`crate::Processes::stop`] to stop it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every thread waiting on it.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks for up to `timeout`. Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// How often and for how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two status queries.
    pub interval: Duration,
    /// Total time to wait for a terminal status.
    pub timeout: Duration,
    /// When set, the interval grows by 1.5x after each poll up to this value.
    pub max_interval: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            max_interval: None,
        }
    }

    pub fn with_backoff(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    /// A zero interval would re-query the server without pause.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.max_interval.is_some_and(|max| max < self.interval) {
            return Err(Error::config(
                "maximum poll interval must not be below the initial interval",
            ));
        }
        Ok(())
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30 * 60))
    }
}

/// What to do after observing a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// A terminal status was observed.
    Done(Status),
    /// Query again after this delay.
    Wait(Duration),
    /// The timeout elapsed without a terminal status.
    TimedOut { last_status: Status, elapsed: Duration },
}

#[derive(Debug, Clone)]
pub struct Poller {
    policy: PollPolicy,
    started: Instant,
    interval: Duration,
    polls: u32,
}

impl Poller {
    /// Starts the timeout clock now.
    pub fn new(policy: PollPolicy) -> Self {
        Self::started_at(policy, Instant::now())
    }

    pub fn started_at(policy: PollPolicy, started: Instant) -> Self {
        Self {
            policy,
            started,
            interval: policy.interval,
            polls: 0,
        }
    }

    /// Number of statuses observed so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn observe(&mut self, status: Status) -> PollStep {
        self.observe_at(status, Instant::now())
    }

    pub fn observe_at(&mut self, status: Status, now: Instant) -> PollStep {
        self.polls += 1;
        if status.is_terminal() {
            return PollStep::Done(status);
        }

        let elapsed = self.elapsed_at(now);
        if elapsed >= self.policy.timeout {
            return PollStep::TimedOut {
                last_status: status,
                elapsed,
            };
        }

        let wait = self.interval.min(self.policy.timeout - elapsed);
        if let Some(max) = self.policy.max_interval {
            self.interval = backoff(self.interval, max);
        }
        PollStep::Wait(wait)
    }
}
