//! Session coordination
//!
//! The gateway limits how fast an application may start new sessions,
//! across all of its shards. Links that need a fresh identify queue here and
//! are let through one at a time. Resumes never queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shardline_core::ShardInfo;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;

use crate::error::{GatewayError, GatewayResult};

/// Default pause between two identifies
pub const IDENTIFY_DELAY: Duration = Duration::from_secs(5);

/// A granted turn to connect and identify
///
/// Completing or dropping it lets the next queued link proceed.
#[derive(Debug)]
pub struct IdentifyPermit {
    shard: ShardInfo,
    done: Option<oneshot::Sender<()>>,
}

impl IdentifyPermit {
    pub fn shard(&self) -> ShardInfo {
        self.shard
    }

    /// The identify finished, successfully or not
    pub fn complete(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl Drop for IdentifyPermit {
    fn drop(&mut self) {
        self.release();
    }
}

/// A queued link's claim on its turn
pub struct PermitTicket {
    receiver: oneshot::Receiver<IdentifyPermit>,
}

impl PermitTicket {
    /// Wait for the turn
    pub async fn granted(self) -> GatewayResult<IdentifyPermit> {
        self.receiver
            .await
            .map_err(|_| GatewayError::CoordinatorStopped)
    }
}

struct Waiting {
    shard: ShardInfo,
    grant: oneshot::Sender<IdentifyPermit>,
}

struct Inner {
    queue: Mutex<VecDeque<Waiting>>,
    wake: Notify,
    stopped: watch::Sender<bool>,
    identify_delay: Duration,
}

/// FIFO of links waiting to identify, drained by a single worker
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Create a coordinator and start its worker
    ///
    /// Must be called within a tokio runtime.
    pub fn new(identify_delay: Duration) -> Self {
        let (stopped, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            stopped,
            identify_delay,
        });
        tokio::spawn(drain(Arc::clone(&inner)));
        Self { inner }
    }

    /// Queue a link for its turn
    pub fn submit(&self, shard: ShardInfo) -> GatewayResult<PermitTicket> {
        if self.is_stopped() {
            return Err(GatewayError::CoordinatorStopped);
        }
        let (grant, receiver) = oneshot::channel();
        self.inner.queue.lock().push_back(Waiting { shard, grant });
        self.inner.wake.notify_one();
        tracing::debug!(shard = %shard, "Queued for identify");
        Ok(PermitTicket { receiver })
    }

    /// Withdraw a link that no longer needs its turn
    pub fn remove(&self, shard: ShardInfo) -> bool {
        let mut queue = self.inner.queue.lock();
        let before = queue.len();
        queue.retain(|w| w.shard != shard);
        let removed = queue.len() != before;
        if removed {
            tracing::debug!(shard = %shard, "Removed from identify queue");
        }
        removed
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Stop handing out turns; pending links are told so
    pub fn stop(&self) {
        self.inner.stopped.send_replace(true);
        self.inner.queue.lock().clear();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("queued", &self.queued())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn drain(inner: Arc<Inner>) {
    let mut stopped = inner.stopped.subscribe();
    // When the last granted identify finished
    let mut last_finished: Option<Instant> = None;
    loop {
        if let Some(finished_at) = last_finished {
            tokio::select! {
                () = tokio::time::sleep_until(finished_at + inner.identify_delay) => {}
                _ = stopped.changed() => return,
            }
        }

        let next = loop {
            if *stopped.borrow() {
                return;
            }
            if let Some(next) = inner.queue.lock().pop_front() {
                break next;
            }
            tokio::select! {
                () = inner.wake.notified() => {}
                _ = stopped.changed() => {}
            }
        };

        let shard = next.shard;
        let (done, finished) = oneshot::channel();
        let permit = IdentifyPermit {
            shard,
            done: Some(done),
        };
        if next.grant.send(permit).is_err() {
            // Submitter went away; its permit was dropped with the send
            continue;
        }
        tracing::debug!(shard = %shard, "Identify turn granted");

        // Links may submit while this one identifies; they wait either way
        tokio::select! {
            _ = finished => {}
            _ = stopped.changed() => return,
        }
        last_finished = Some(Instant::now());
    }
}
