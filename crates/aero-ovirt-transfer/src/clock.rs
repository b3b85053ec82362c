//! Time source and the fixed-interval polling loop shared by every readiness wait.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::Result;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Total virtual time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed = elapsed.saturating_add(duration);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Result of [`poll_until`]. Running out of time is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { waited: Duration },
}

impl<T> PollOutcome<T> {
    /// Converts a timeout into [`crate::TransferError::Timeout`] labelled with `what`.
    pub fn or_timeout(self, what: &'static str) -> Result<T> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::TimedOut { waited } => Err(crate::TransferError::Timeout { what, waited }),
        }
    }
}

/// Sleep, probe, repeat until `probe` yields a value or `timeout` has elapsed.
///
/// Each iteration sleeps first (the server never reports a state change synchronously with the
/// request that caused it) and never sleeps past the deadline, so a condition that never holds
/// times out exactly at `start + timeout` after one final probe. Probe errors abort the wait.
pub fn poll_until<T, F>(
    clock: &dyn Clock,
    interval: Duration,
    timeout: Duration,
    mut probe: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Result<Option<T>>,
{
    let start = clock.now();
    let deadline = start + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(clock.now());
        clock.sleep(interval.min(remaining));

        if let Some(value) = probe()? {
            return Ok(PollOutcome::Ready(value));
        }

        let now = clock.now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut {
                waited: now.duration_since(start),
            });
        }
    }
}
