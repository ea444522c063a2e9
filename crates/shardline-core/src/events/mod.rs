//! Events and connection lifecycle states

mod connection_state;
mod event;

pub use connection_state::ConnectionState;
pub use event::Event;
