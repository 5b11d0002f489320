use std::time::{Duration, Instant};

/// Time of the last qualifying user interaction
#[derive(Debug, Clone, Copy)]
pub struct InteractionTimer {
    last: Instant,
}

impl InteractionTimer {
    pub fn new(now: Instant) -> Self {
        Self { last: now }
    }

    /// Mark an interaction at `now`; never moves the mark backwards
    pub fn reset(&mut self, now: Instant) {
        self.last = self.last.max(now);
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last)
    }
}
