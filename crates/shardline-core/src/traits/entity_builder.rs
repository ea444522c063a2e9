//! Entity builder seam
//!
//! The gateway hands raw payloads to an [`EntityBuilder`] and forwards
//! whatever events it returns to the dispatcher. Construction is idempotent
//! per id: building an already-cached entity returns the cached instance.

use serde_json::Value;
use std::sync::Arc;

use crate::entities::{Guild, GuildMember, User};
use crate::error::BuildError;
use crate::events::Event;
use crate::value_objects::{ShardInfo, Snowflake};

/// Builds domain objects and events from raw gateway payloads
pub trait EntityBuilder: Send + Sync {
    /// Build the current user from the startup payload
    fn build_self_user(&self, raw: &Value) -> Result<Arc<User>, BuildError>;

    /// Build a guild from a guild object (available or not)
    fn build_guild(&self, raw: &Value) -> Result<Arc<Guild>, BuildError>;

    /// Build the members of one guild, typically a fully chunked list
    fn build_members(
        &self,
        guild_id: Snowflake,
        raw: &[Value],
    ) -> Result<Vec<Arc<GuildMember>>, BuildError>;

    /// Build the event for a released dispatch frame
    ///
    /// `Ok(None)` means the frame only updates state and has no listener
    /// facing event.
    fn build_event(
        &self,
        shard: ShardInfo,
        kind: &str,
        sequence: Option<u64>,
        raw: &Value,
    ) -> Result<Option<Event>, BuildError>;

    /// Drop everything cached on behalf of `shard` after its session was lost
    fn invalidate(&self, shard: ShardInfo);
}
