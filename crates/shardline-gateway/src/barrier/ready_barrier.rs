//! Two-level dispatch buffer
//!
//! A connection-wide buffer is active while the session is not yet
//! consistent (between identify and the end of startup, or between resume
//! and its acknowledgement). Guilds that are still loading get their own
//! buffer on top of that.

use std::collections::HashMap;

use shardline_core::Snowflake;

use super::{GuildLoadState, ReplayBuffer};
use crate::events::DispatchFrame;

/// Whether and why frames are held back connection-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarrierMode {
    /// Everything not guild-scoped flows through
    #[default]
    Open,
    /// Identify sent, waiting on the startup payload
    AwaitingReady,
    /// Startup payload received, guilds still arriving
    Startup,
    /// Resume sent, waiting on its acknowledgement
    Resume,
}

/// Buffers plus the load state of every guild not yet ready
#[derive(Debug, Default)]
pub struct ReadyBarrier {
    mode: BarrierMode,
    global: ReplayBuffer,
    guilds: HashMap<Snowflake, GuildLoadState>,
}

impl ReadyBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> BarrierMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: BarrierMode) {
        self.mode = mode;
    }

    /// Connection-wide buffering is active
    pub fn is_buffering(&self) -> bool {
        self.mode != BarrierMode::Open
    }

    /// Track a guild announced by the startup payload
    pub fn register(&mut self, guild_id: Snowflake) {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| GuildLoadState::new(guild_id))
            .startup = true;
    }

    pub fn insert(&mut self, state: GuildLoadState) {
        self.guilds.insert(state.id, state);
    }

    pub fn is_loading(&self, guild_id: Snowflake) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    pub fn state(&self, guild_id: Snowflake) -> Option<&GuildLoadState> {
        self.guilds.get(&guild_id)
    }

    pub fn state_mut(&mut self, guild_id: Snowflake) -> Option<&mut GuildLoadState> {
        self.guilds.get_mut(&guild_id)
    }

    pub fn remove(&mut self, guild_id: Snowflake) -> Option<GuildLoadState> {
        self.guilds.remove(&guild_id)
    }

    /// Append to the connection-wide buffer
    pub fn push_global(&mut self, frame: DispatchFrame) {
        self.global.push(frame);
    }

    /// Move a guild's buffered frames behind the connection-wide ones
    pub fn append_global(&mut self, buffer: &mut ReplayBuffer) {
        self.global.append(buffer);
    }

    /// Hold `frame` if anything says so, otherwise hand it back
    pub fn gate(&mut self, frame: DispatchFrame) -> Option<DispatchFrame> {
        if let Some(state) = frame.guild_scope().and_then(|id| self.guilds.get_mut(&id)) {
            state.buffer.push(frame);
            return None;
        }
        if self.is_buffering() {
            self.global.push(frame);
            return None;
        }
        Some(frame)
    }

    /// Every guild still tracked is in an outage
    pub fn is_settled(&self) -> bool {
        self.guilds.values().all(|g| g.unavailable)
    }

    /// Every tracked guild has sent its payload
    pub fn all_acknowledged(&self) -> bool {
        self.guilds.values().all(|g| g.acknowledged)
    }

    /// Chunking guilds without a member request yet; marks them requested
    pub fn take_unrequested(&mut self) -> Vec<Snowflake> {
        let mut ids: Vec<_> = self
            .guilds
            .values_mut()
            .filter(|g| g.chunking && !g.requested)
            .map(|g| {
                g.requested = true;
                g.id
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Remove guilds in an outage, returning their held frames
    ///
    /// Interrupted guilds stay tracked until they load again.
    pub fn take_unavailable(&mut self) -> Vec<DispatchFrame> {
        let mut ids: Vec<_> = self
            .guilds
            .values()
            .filter(|g| g.unavailable && !g.interrupted)
            .map(|g| g.id)
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.guilds.remove(&id))
            .flat_map(GuildLoadState::into_frames)
            .collect()
    }

    /// Empty the connection-wide buffer, oldest first
    pub fn take_global(&mut self) -> Vec<DispatchFrame> {
        self.global.drain().collect()
    }

    pub fn global_len(&self) -> usize {
        self.global.len()
    }

    pub fn loading_count(&self) -> usize {
        self.guilds.len()
    }

    pub fn unavailable_count(&self) -> usize {
        self.guilds.values().filter(|g| g.unavailable).count()
    }

    /// Forget everything; used when the session is invalidated
    pub fn reset(&mut self) {
        self.mode = BarrierMode::Open;
        self.global.clear();
        self.guilds.clear();
    }
}
