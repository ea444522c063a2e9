//! Reconnect backoff

use std::time::Duration;

/// Doubling delay between consecutive failed reconnects
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay before the next attempt; doubles the one after
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Peek at the next delay without consuming it
    pub fn current(&self) -> Duration {
        self.current
    }

    /// A connect succeeded
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(900))
    }
}
