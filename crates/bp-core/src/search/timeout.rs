//! Wall-clock budgets for polling loops.

use bp_common::Result;
use std::time::{Duration, Instant};

/// A timeout budget with a fixed poll interval.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
    interval: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Deadline {
            start: Instant::now(),
            timeout,
            interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Sleep for one interval, never past the deadline.
    pub fn sleep(&self) {
        let pause = self.remaining().min(self.interval);
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
}

/// Call `attempt` until it yields a value or the deadline expires.
///
/// `attempt` always runs at least once. Errors abort the loop immediately.
/// Returns `Ok(None)` when the budget ran out without a value.
pub fn poll_until<T>(
    deadline: &Deadline,
    mut attempt: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    loop {
        if let Some(value) = attempt()? {
            return Ok(Some(value));
        }
        if deadline.expired() {
            return Ok(None);
        }
        deadline.sleep();
    }
}
