//! Outbound frame pacing
//!
//! The gateway closes a connection that sends more than 120 frames in 60
//! seconds. Handshake and heartbeat frames may use that whole budget; queued
//! frames stop a few short so a heartbeat always fits.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::GatewayMessage;

/// Sliding window length
pub const WINDOW: Duration = Duration::from_secs(60);
/// Frames allowed per window
pub const LIMIT: usize = 120;
/// Frames kept back from queued traffic
pub const RESERVED: usize = 5;

/// Which queue a frame waits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Handshake and heartbeat
    Critical,
    /// Frames the link issues itself, such as member requests
    Control,
    /// Frames the application asked for
    Application,
}

/// Per-connection send budget with prioritized queues
#[derive(Debug)]
pub struct OutboundPacer {
    window: Duration,
    limit: usize,
    reserved: usize,
    sent: VecDeque<Instant>,
    critical: VecDeque<GatewayMessage>,
    control: VecDeque<GatewayMessage>,
    application: VecDeque<GatewayMessage>,
    handshake_sent: bool,
}

impl Default for OutboundPacer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundPacer {
    pub fn new() -> Self {
        Self::with_limits(WINDOW, LIMIT, RESERVED)
    }

    pub fn with_limits(window: Duration, limit: usize, reserved: usize) -> Self {
        Self {
            window,
            limit,
            reserved: reserved.min(limit),
            sent: VecDeque::with_capacity(limit),
            critical: VecDeque::new(),
            control: VecDeque::new(),
            application: VecDeque::new(),
            handshake_sent: false,
        }
    }

    pub fn push(&mut self, lane: Lane, message: GatewayMessage) {
        match lane {
            Lane::Critical => self.critical.push_back(message),
            Lane::Control => self.control.push_back(message),
            Lane::Application => self.application.push_back(message),
        }
    }

    /// The handshake went out on the current socket; queued lanes may drain
    pub fn handshake_sent(&mut self) {
        self.handshake_sent = true;
    }

    /// The socket is gone
    ///
    /// The new socket gets a fresh budget. Critical frames were for the old
    /// socket and are dropped; queued lanes wait for the next handshake.
    pub fn on_disconnect(&mut self) {
        self.handshake_sent = false;
        self.sent.clear();
        self.critical.clear();
    }

    /// Drop link-issued frames that belong to an invalidated session
    pub fn clear_control(&mut self) {
        self.control.clear();
    }

    /// Next frame allowed out at `now`, highest priority first
    pub fn poll(&mut self, now: Instant) -> Option<GatewayMessage> {
        self.prune(now);
        if !self.critical.is_empty() && self.sent.len() < self.limit {
            return self.record(now, Lane::Critical);
        }
        if !self.handshake_sent || self.sent.len() >= self.limit - self.reserved {
            return None;
        }
        if !self.control.is_empty() {
            return self.record(now, Lane::Control);
        }
        if !self.application.is_empty() {
            return self.record(now, Lane::Application);
        }
        None
    }

    /// When `poll` could next yield, if anything is waiting on budget
    pub fn next_ready(&self, now: Instant) -> Option<Instant> {
        let queued = !self.control.is_empty() || !self.application.is_empty();
        let waiting = !self.critical.is_empty() || (queued && self.handshake_sent);
        if !waiting {
            return None;
        }
        let threshold = if self.critical.is_empty() {
            self.limit - self.reserved
        } else {
            self.limit
        };
        let live: Vec<_> = self
            .sent
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .collect();
        if live.len() < threshold {
            return Some(now);
        }
        // The frame that has to expire before one more fits
        live.get(live.len() - threshold)
            .map(|oldest| **oldest + self.window)
    }

    /// Frames sent within the current window
    pub fn used(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.sent.len()
    }

    pub fn queued(&self) -> usize {
        self.critical.len() + self.control.len() + self.application.len()
    }

    fn record(&mut self, now: Instant, lane: Lane) -> Option<GatewayMessage> {
        let message = match lane {
            Lane::Critical => self.critical.pop_front(),
            Lane::Control => self.control.pop_front(),
            Lane::Application => self.application.pop_front(),
        }?;
        self.sent.push_back(now);
        Some(message)
    }

    fn prune(&mut self, now: Instant) {
        while self
            .sent
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            self.sent.pop_front();
        }
    }
}
