//! Heartbeat scheduling
//!
//! Tracks when the next heartbeat is due, whether the previous one was
//! acknowledged, and the round-trip latency of the last acknowledged beat.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Outcome of a due heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now
    Send,
    /// The previous beat was never acknowledged
    Zombie,
}

/// Heartbeat state of one socket
#[derive(Debug)]
pub struct Heartbeat {
    interval: Option<Duration>,
    next_due: Option<Instant>,
    last_sent: Option<Instant>,
    acked: bool,
    watchdog: bool,
    latency_ms: Arc<AtomicI64>,
}

impl Heartbeat {
    pub fn new(watchdog: bool) -> Self {
        Self {
            interval: None,
            next_due: None,
            last_sent: None,
            acked: true,
            watchdog,
            latency_ms: Arc::new(AtomicI64::new(-1)),
        }
    }

    /// Begin beating at the interval from Hello
    ///
    /// The first beat is jittered across one interval so that many
    /// connections started together do not beat in lockstep.
    pub fn start(&mut self, interval: Duration, now: Instant) {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        self.interval = Some(interval);
        self.next_due = Some(now + interval.mul_f64(jitter));
        self.last_sent = None;
        self.acked = true;
    }

    /// Stop beating; the socket is gone
    pub fn stop(&mut self) {
        self.interval = None;
        self.next_due = None;
        self.last_sent = None;
        self.acked = true;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// The scheduled beat is due
    pub fn on_due(&mut self, now: Instant) -> Beat {
        if self.watchdog && !self.acked && self.last_sent.is_some() {
            return Beat::Zombie;
        }
        self.mark_sent(now);
        if let Some(interval) = self.interval {
            self.next_due = Some(now + interval);
        }
        Beat::Send
    }

    /// A beat was sent outside the schedule, at the server's request
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.acked = false;
    }

    /// Heartbeat acknowledged; records latency
    pub fn on_ack(&mut self, now: Instant) {
        self.acked = true;
        if let Some(sent) = self.last_sent {
            let rtt = now.saturating_duration_since(sent);
            let ms = i64::try_from(rtt.as_millis()).unwrap_or(i64::MAX);
            self.latency_ms.store(ms, Ordering::Relaxed);
        }
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Shared view of the latency for handles outside the link task
    pub fn latency_handle(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.latency_ms)
    }

    pub fn latency(&self) -> Option<Duration> {
        latency_from(&self.latency_ms)
    }
}

/// Read a latency published by [`Heartbeat`]
pub fn latency_from(cell: &AtomicI64) -> Option<Duration> {
    u64::try_from(cell.load(Ordering::Relaxed))
        .ok()
        .map(Duration::from_millis)
}
