//! Gateway links
//!
//! One link per shard: the handle callers hold, the task that runs the
//! connection, the resumable session it carries and the registry of links.

mod connection;
mod manager;
mod runner;
mod session;

pub use connection::{GatewayLink, LinkDeps, LinkSettings};
pub(crate) use connection::LinkCommand;
pub use manager::LinkManager;
pub use session::Session;
