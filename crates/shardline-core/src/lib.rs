//! # shardline-core
//!
//! Domain layer: snowflake ids, the entities the gateway builds, listener
//! facing events, the entity builder seam with its in-memory cache, and the
//! event dispatcher. No networking lives here.

pub mod cache;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use cache::EntityCache;
pub use dispatch::{EventDispatcher, EventDispatcherConfig, EventListener, ListenerError};
pub use entities::{Guild, GuildMember, User};
pub use error::BuildError;
pub use events::{ConnectionState, Event};
pub use traits::EntityBuilder;
pub use value_objects::{ShardInfo, Snowflake, SnowflakeParseError};
