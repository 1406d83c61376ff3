//! Bounded retry-with-backoff polling.
//!
//! Delays grow geometrically from `initial` by `factor`, capped at `max`:
//! with the defaults that is 50ms, 100ms, 200ms, 400ms, 800ms, 1s, 1s, ...
//! A poll is bounded by a wall-clock timeout, a maximum attempt count, or
//! both; running out of either yields [`PollOutcome::TimedOut`], never an
//! unbounded loop.

use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            factor: 2,
            max: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failed probe (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.factor.max(1));
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

/// Upper bounds for a poll. At least one should be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollLimit {
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl PollLimit {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            max_attempts: None,
        }
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            timeout: None,
            max_attempts: Some(max_attempts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    TimedOut { attempts: u32, elapsed: Duration },
}

/// Call `probe` until it yields `Some`, sleeping per `backoff` in between.
///
/// Probe errors end the poll immediately.
pub fn poll_until<T, E>(
    backoff: &Backoff,
    limit: PollLimit,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
) -> Result<PollOutcome<T>, E> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(value) = probe()? {
            return Ok(PollOutcome::Ready { value, attempts });
        }

        if limit.max_attempts.is_some_and(|max| attempts >= max) {
            return Ok(PollOutcome::TimedOut {
                attempts,
                elapsed: started.elapsed(),
            });
        }

        let mut delay = backoff.delay(attempts);
        if let Some(timeout) = limit.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(PollOutcome::TimedOut { attempts, elapsed });
            }
            delay = delay.min(timeout - elapsed);
        }
        sleep(delay);
    }
}
