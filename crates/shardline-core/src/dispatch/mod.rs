//! Listener registration and event fan-out

mod dispatcher;

pub use dispatcher::{EventDispatcher, EventDispatcherConfig, EventListener, ListenerError};
