//! Per-guild load state

use shardline_core::Snowflake;

use super::ReplayBuffer;
use crate::events::DispatchFrame;

/// Loading progress of one guild
#[derive(Debug, Clone)]
pub struct GuildLoadState {
    pub id: Snowflake,
    /// Not fully loaded yet
    pub incomplete: bool,
    /// Known to be in an outage
    pub unavailable: bool,
    /// Its guild payload has arrived
    pub acknowledged: bool,
    /// Waiting on member chunks
    pub chunking: bool,
    /// A member request was already issued
    pub requested: bool,
    /// Announced by the startup payload
    pub startup: bool,
    /// Went unavailable mid-load; held frames wait for its next create
    pub interrupted: bool,
    pub expected_members: u64,
    pub received_members: u64,
    /// The guild's own create frame, released ahead of `buffer`
    pub create: Option<DispatchFrame>,
    pub buffer: ReplayBuffer,
}

impl GuildLoadState {
    pub fn new(id: Snowflake) -> Self {
        Self {
            id,
            incomplete: true,
            unavailable: false,
            acknowledged: false,
            chunking: false,
            requested: false,
            startup: false,
            interrupted: false,
            expected_members: 0,
            received_members: 0,
            create: None,
            buffer: ReplayBuffer::new(),
        }
    }

    /// Record the guild payload
    pub fn acknowledge(&mut self, unavailable: bool, chunking: bool) {
        self.acknowledged = true;
        self.unavailable = unavailable;
        self.chunking = !unavailable && chunking;
    }

    /// Outage while loading: the partial payload is dropped, `buffer` is kept
    pub fn interrupt(&mut self) {
        self.create = None;
        self.acknowledge(true, false);
        self.interrupted = true;
        self.expected_members = 0;
        self.received_members = 0;
    }

    /// Frames to release, create frame first
    pub fn into_frames(mut self) -> Vec<DispatchFrame> {
        let mut frames = Vec::with_capacity(self.buffer.len() + 1);
        frames.extend(self.create.take());
        frames.extend(self.buffer.drain());
        frames
    }
}
