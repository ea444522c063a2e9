//! Cross-bucket global cooldown

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A single "blocked until" instant shared by every bucket
///
/// Written only when the server reports a global throttle; extending never
/// shortens an active cooldown.
#[derive(Debug, Default)]
pub struct GlobalCooldown {
    until: Mutex<Option<Instant>>,
}

impl GlobalCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cooldown meant to be handed to several gateways
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Block dispatch until at least `until`
    pub fn extend_until(&self, until: Instant) {
        let mut current = self.until.lock();
        match *current {
            Some(existing) if existing >= until => {}
            _ => *current = Some(until),
        }
    }

    /// Time left before dispatch may resume
    pub fn remaining(&self, now: Instant) -> Duration {
        let mut current = self.until.lock();
        match *current {
            Some(until) if until > now => until - now,
            Some(_) => {
                *current = None;
                Duration::ZERO
            }
            None => Duration::ZERO,
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        !self.remaining(now).is_zero()
    }
}
