//! Events delivered to listeners
//!
//! Connection lifecycle events are produced by the gateway itself; the rest
//! are built from released dispatch frames by the entity builder.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::ConnectionState;
use crate::entities::{Guild, GuildMember, User};
use crate::value_objects::{ShardInfo, Snowflake};

/// All events a listener can observe
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    // =========================================================================
    // Connection Events
    // =========================================================================
    /// Startup finished: every guild is loaded or known to be unavailable
    Ready {
        shard: ShardInfo,
        user: Option<Arc<User>>,
        guilds: usize,
        unavailable_guilds: usize,
    },
    /// A resume was acknowledged and the frames held back meanwhile replayed
    Resumed { shard: ShardInfo, replayed: usize },
    /// The connection moved to a new lifecycle state
    StatusChanged {
        shard: ShardInfo,
        old: ConnectionState,
        new: ConnectionState,
    },
    /// The socket closed; `code` is absent for abrupt disconnects
    Disconnected { shard: ShardInfo, code: Option<u16> },
    /// The connection stopped for good
    Shutdown {
        shard: ShardInfo,
        code: Option<u16>,
        reason: String,
    },

    // =========================================================================
    // Guild Events
    // =========================================================================
    /// A guild that was unavailable became available
    GuildAvailable { shard: ShardInfo, guild: Arc<Guild> },
    /// The client joined a guild after startup
    GuildJoin { shard: ShardInfo, guild: Arc<Guild> },
    /// A guild went unavailable (outage)
    GuildUnavailable { shard: ShardInfo, guild_id: Snowflake },
    /// The client left or was removed from a guild
    GuildLeave { shard: ShardInfo, guild_id: Snowflake },
    /// The full member list of a guild was received
    MembersChunked {
        shard: ShardInfo,
        guild_id: Snowflake,
        count: usize,
    },

    // =========================================================================
    // Member Events
    // =========================================================================
    MemberJoin {
        shard: ShardInfo,
        member: Arc<GuildMember>,
    },
    MemberLeave {
        shard: ShardInfo,
        guild_id: Snowflake,
        user: Arc<User>,
    },

    // =========================================================================
    // Everything Else
    // =========================================================================
    /// A dispatch frame without a dedicated event type
    Dispatch {
        shard: ShardInfo,
        kind: String,
        sequence: Option<u64>,
        data: Value,
    },
}

impl Event {
    /// Shard that produced this event
    pub fn shard(&self) -> ShardInfo {
        match self {
            Self::Ready { shard, .. }
            | Self::Resumed { shard, .. }
            | Self::StatusChanged { shard, .. }
            | Self::Disconnected { shard, .. }
            | Self::Shutdown { shard, .. }
            | Self::GuildAvailable { shard, .. }
            | Self::GuildJoin { shard, .. }
            | Self::GuildUnavailable { shard, .. }
            | Self::GuildLeave { shard, .. }
            | Self::MembersChunked { shard, .. }
            | Self::MemberJoin { shard, .. }
            | Self::MemberLeave { shard, .. }
            | Self::Dispatch { shard, .. } => *shard,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &str {
        match self {
            Self::Ready { .. } => "READY",
            Self::Resumed { .. } => "RESUMED",
            Self::StatusChanged { .. } => "STATUS_CHANGED",
            Self::Disconnected { .. } => "DISCONNECTED",
            Self::Shutdown { .. } => "SHUTDOWN",
            Self::GuildAvailable { .. } => "GUILD_AVAILABLE",
            Self::GuildJoin { .. } => "GUILD_JOIN",
            Self::GuildUnavailable { .. } => "GUILD_UNAVAILABLE",
            Self::GuildLeave { .. } => "GUILD_LEAVE",
            Self::MembersChunked { .. } => "MEMBERS_CHUNKED",
            Self::MemberJoin { .. } => "MEMBER_JOIN",
            Self::MemberLeave { .. } => "MEMBER_LEAVE",
            Self::Dispatch { kind, .. } => kind,
        }
    }
}
