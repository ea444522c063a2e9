//! Event dispatcher
//!
//! Fans built events out to registered listeners and to broadcast
//! subscribers. Delivery is best effort per listener: a listener that fails
//! or panics is logged and the remaining listeners still run. Panics are
//! only contained with `panic = "unwind"`; the release profile aborts.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::events::Event;

/// Error type listeners may return
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every dispatched event, in release order
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Configuration for the event dispatcher
#[derive(Debug, Clone)]
pub struct EventDispatcherConfig {
    /// Broadcast buffer size for `subscribe` receivers
    pub broadcast_buffer: usize,
}

impl Default for EventDispatcherConfig {
    fn default() -> Self {
        Self {
            broadcast_buffer: 1024,
        }
    }
}

/// Event dispatcher shared by every shard of a client
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    broadcast: broadcast::Sender<Event>,
    dispatched: AtomicU64,
    failures: AtomicU64,
}

impl EventDispatcher {
    /// Create a dispatcher with default configuration
    pub fn new() -> Self {
        Self::with_config(EventDispatcherConfig::default())
    }

    /// Create a dispatcher with custom configuration
    pub fn with_config(config: EventDispatcherConfig) -> Self {
        let (broadcast, _) = broadcast::channel(config.broadcast_buffer.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            broadcast,
            dispatched: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregister a listener previously added with `add_listener`
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Subscribe to a stream of events
    ///
    /// Slow receivers lag and lose the oldest events rather than blocking
    /// the gateway.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast.subscribe()
    }

    /// Deliver one event to every listener and subscriber
    pub fn dispatch(&self, event: Event) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        // Snapshot so listeners may register others without deadlocking
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = %event.name(),
                        shard = %event.shard(),
                        error = %e,
                        "Event listener failed"
                    );
                }
                Err(payload) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        event = %event.name(),
                        shard = %event.shard(),
                        panic = panic_message(payload.as_ref()),
                        "Event listener panicked"
                    );
                }
            }
        }

        tracing::trace!(event = %event.name(), shard = %event.shard(), "Event dispatched");
        // No subscribers is not an error
        let _ = self.broadcast.send(event);
    }

    /// Number of events dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Number of listener failures so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic")
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listeners.read().len())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}
