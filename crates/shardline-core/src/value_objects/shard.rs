//! Shard identity

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Snowflake;

/// Identity of one gateway connection within a sharded application
///
/// Serializes as the `[id, count]` pair the identify payload expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct ShardInfo {
    pub id: u32,
    pub count: u32,
}

impl ShardInfo {
    /// The single shard of an unsharded application
    pub const SINGLE: Self = Self { id: 0, count: 1 };

    /// Create shard info, clamping a zero count to one
    pub fn new(id: u32, count: u32) -> Self {
        Self {
            id,
            count: count.max(1),
        }
    }

    /// Whether the application runs more than one shard
    #[inline]
    pub const fn is_sharded(self) -> bool {
        self.count > 1
    }

    /// Whether this shard receives the events of `guild_id`
    #[inline]
    pub fn owns(self, guild_id: Snowflake) -> bool {
        Self::shard_id_for(guild_id, self.count) == self.id
    }

    /// Shard id that receives a guild's events out of `count` shards
    pub fn shard_id_for(guild_id: Snowflake, count: u32) -> u32 {
        let count = u64::from(count.max(1));
        // Remainder is below `count`, which fits in u32
        ((guild_id.get() >> 22) % count) as u32
    }
}

impl From<[u32; 2]> for ShardInfo {
    fn from([id, count]: [u32; 2]) -> Self {
        Self::new(id, count)
    }
}

impl From<ShardInfo> for [u32; 2] {
    fn from(shard: ShardInfo) -> Self {
        [shard.id, shard.count]
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} / {}]", self.id, self.count)
    }
}
