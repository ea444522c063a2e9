//! Member chunk aggregation
//!
//! Large guilds arrive without their full member list. The list is requested
//! separately and streams back in chunks; this collects them per guild until
//! the expected count is reached.

use std::collections::HashMap;

use serde_json::Value;
use shardline_core::Snowflake;

use crate::protocol::RequestGuildMembersPayload;

#[derive(Debug)]
struct PendingMembers {
    expected: u64,
    members: Vec<Value>,
}

/// Per-guild member accumulator
#[derive(Debug, Default)]
pub struct MemberChunkAggregator {
    pending: HashMap<Snowflake, PendingMembers>,
}

impl MemberChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting for a guild, seeded with members it already sent
    pub fn expect(&mut self, guild_id: Snowflake, expected: u64, seed: Vec<Value>) {
        tracing::debug!(
            guild_id = %guild_id,
            expected,
            included = seed.len(),
            "Awaiting member chunks"
        );
        self.pending.insert(
            guild_id,
            PendingMembers {
                expected,
                members: seed,
            },
        );
    }

    /// Add one chunk; yields the full member set once it is complete
    pub fn on_chunk(&mut self, guild_id: Snowflake, members: Vec<Value>) -> Option<Vec<Value>> {
        let pending = self.pending.get_mut(&guild_id)?;
        pending.members.extend(members);
        if (pending.members.len() as u64) < pending.expected {
            tracing::trace!(
                guild_id = %guild_id,
                received = pending.members.len(),
                expected = pending.expected,
                "Member chunk received"
            );
            return None;
        }
        self.pending.remove(&guild_id).map(|p| p.members)
    }

    /// Shift the expected count of a guild being chunked
    ///
    /// Returns whether the guild was being tracked. Never completes a guild
    /// by itself; the next chunk does.
    pub fn adjust(&mut self, guild_id: Snowflake, delta: i64) -> bool {
        match self.pending.get_mut(&guild_id) {
            Some(pending) => {
                pending.expected = pending.expected.saturating_add_signed(delta);
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self, guild_id: Snowflake) -> bool {
        self.pending.remove(&guild_id).is_some()
    }

    pub fn is_pending(&self, guild_id: Snowflake) -> bool {
        self.pending.contains_key(&guild_id)
    }

    /// Members still missing for a guild
    pub fn remaining(&self, guild_id: Snowflake) -> Option<u64> {
        self.pending
            .get(&guild_id)
            .map(|p| p.expected.saturating_sub(p.members.len() as u64))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Split guild ids into member requests of at most 50 guilds each
pub fn request_batches(guild_ids: &[Snowflake]) -> Vec<Vec<Snowflake>> {
    guild_ids
        .chunks(RequestGuildMembersPayload::MAX_GUILDS)
        .map(<[Snowflake]>::to_vec)
        .collect()
}
