//! Dispatch kinds the link acts on
//!
//! Everything else travels by its raw `t` name and is only gated by the
//! ready barrier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dispatch names with special handling in the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchKind {
    /// Startup payload after Identify
    Ready,
    Resumed,
    /// Guild available, joined or created
    GuildCreate,
    GuildUpdate,
    /// Left, kicked, or the guild went unavailable
    GuildDelete,
    /// One page of a member list request
    GuildMembersChunk,
    GuildMemberAdd,
    GuildMemberRemove,
}

const NAMES: [(DispatchKind, &str); 8] = [
    (DispatchKind::Ready, "READY"),
    (DispatchKind::Resumed, "RESUMED"),
    (DispatchKind::GuildCreate, "GUILD_CREATE"),
    (DispatchKind::GuildUpdate, "GUILD_UPDATE"),
    (DispatchKind::GuildDelete, "GUILD_DELETE"),
    (DispatchKind::GuildMembersChunk, "GUILD_MEMBERS_CHUNK"),
    (DispatchKind::GuildMemberAdd, "GUILD_MEMBER_ADD"),
    (DispatchKind::GuildMemberRemove, "GUILD_MEMBER_REMOVE"),
];

impl DispatchKind {
    /// Wire name carried in `t`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map_or("", |(_, name)| name)
    }

    /// Kind for a wire name, `None` for names passed through untouched
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(kind, _)| *kind)
    }

    /// Frames about a guild itself, whose `id` field is the guild id
    #[must_use]
    pub const fn is_guild_lifecycle(self) -> bool {
        matches!(self, Self::GuildCreate | Self::GuildUpdate | Self::GuildDelete)
    }

    /// Frames the ready barrier consumes instead of buffering
    #[must_use]
    pub const fn is_barrier_control(self) -> bool {
        matches!(self, Self::Ready | Self::Resumed | Self::GuildMembersChunk)
    }

    /// Member count adjustments for guilds still being chunked
    #[must_use]
    pub const fn member_delta(self) -> i64 {
        match self {
            Self::GuildMemberAdd => 1,
            Self::GuildMemberRemove => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
