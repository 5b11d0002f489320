//! Clock and tick scheduling
//!
//! All waiting in the daemon goes through a [`Clock`] so the controller,
//! the command channel and the meter can be driven on virtual time in tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of time and of blocking waits
pub trait Clock: Send + Sync {
    /// Current monotonic time
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Fixed-cadence tick scheduler
///
/// `wait` sleeps until the next tick boundary. If the caller overran the
/// boundary (a blocking pipeline call, a sub-mode exit) the schedule restarts
/// from now instead of firing a burst of catch-up ticks.
pub struct Ticker {
    clock: Arc<dyn Clock>,
    next: Option<Instant>,
}

impl Ticker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, next: None }
    }

    /// Sleep until the next tick of the given interval
    pub fn wait(&mut self, interval: Duration) {
        let now = self.clock.now();
        let target = match self.next {
            Some(next) if next > now => next,
            _ => now + interval,
        };
        self.clock.sleep(target.saturating_duration_since(now));
        self.next = Some(target + interval);
    }

    /// Forget the current schedule; the next `wait` starts a fresh one
    pub fn reset(&mut self) {
        self.next = None;
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
