//! Reconnect delays.

use std::time::Duration;

/// Capped exponential backoff: `initial, 2*initial, 4*initial, ... max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial.min(max),
        }
    }

    /// Delay to wait now. Doubles the following one, up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Start over after a success.
    pub fn reset(&mut self) {
        self.next = self.initial.min(self.max);
    }
}
