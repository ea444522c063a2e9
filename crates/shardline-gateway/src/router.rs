//! Dispatch routing
//!
//! Decides, frame by frame, whether a dispatch reaches the entity builder
//! now, waits in a buffer, or turns into member bookkeeping. The router is
//! owned by one link and never shared.

use serde_json::Value;
use shardline_core::Snowflake;

use crate::barrier::{BarrierMode, GuildLoadState, ReadyBarrier, ReplayBuffer};
use crate::chunking::{request_batches, MemberChunkAggregator};
use crate::events::{DispatchFrame, DispatchKind};

/// What the link should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Hand the frame to the entity builder
    Deliver(DispatchFrame),
    /// Cache a guild from the startup set without telling listeners
    StartupGuild(DispatchFrame),
    /// A guild's member list is complete
    Members {
        guild_id: Snowflake,
        members: Vec<Value>,
    },
    /// Ask the gateway for these guilds' members
    RequestMembers(Vec<Snowflake>),
    /// Startup finished
    Ready {
        user: Option<Value>,
        guilds: usize,
        unavailable: usize,
    },
    /// Resume acknowledged; `replayed` frames follow
    Resumed { replayed: usize },
}

/// Barrier plus chunk aggregator for one connection
#[derive(Debug, Default)]
pub struct DispatchRouter {
    barrier: ReadyBarrier,
    chunks: MemberChunkAggregator,
    startup_user: Option<Value>,
    startup_guilds: usize,
    chunks_requested: bool,
}

impl DispatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> BarrierMode {
        self.barrier.mode()
    }

    pub fn is_buffering(&self) -> bool {
        self.barrier.is_buffering()
    }

    /// Guilds still loading
    pub fn loading(&self) -> usize {
        self.barrier.loading_count()
    }

    /// A fresh identify was sent: previous state is gone
    pub fn begin_identify(&mut self) {
        self.reset();
        self.barrier.set_mode(BarrierMode::AwaitingReady);
    }

    /// A resume was sent
    ///
    /// An interrupted startup keeps its mode: the resume acknowledgement is
    /// then just one more frame while guilds finish arriving.
    pub fn begin_resume(&mut self) {
        if self.barrier.mode() == BarrierMode::Open {
            self.barrier.set_mode(BarrierMode::Resume);
        }
    }

    /// Drop all buffered frames and load state
    pub fn reset(&mut self) {
        self.barrier.reset();
        self.chunks.clear();
        self.startup_user = None;
        self.startup_guilds = 0;
        self.chunks_requested = false;
    }

    /// Route one frame in arrival order
    pub fn route(&mut self, frame: DispatchFrame) -> Vec<Routed> {
        let mut out = Vec::new();
        match frame.known_kind() {
            Some(DispatchKind::Ready) => self.on_ready(&frame, &mut out),
            Some(DispatchKind::Resumed) => self.on_resumed(&mut out),
            Some(DispatchKind::GuildCreate) => self.on_guild_create(frame, &mut out),
            Some(DispatchKind::GuildDelete) => self.on_guild_delete(frame, &mut out),
            Some(DispatchKind::GuildMembersChunk) => self.on_members_chunk(frame, &mut out),
            Some(kind @ (DispatchKind::GuildMemberAdd | DispatchKind::GuildMemberRemove)) => {
                self.adjust(&frame, kind.member_delta());
                self.gate(frame, &mut out);
            }
            _ => self.gate(frame, &mut out),
        }
        out
    }

    fn on_ready(&mut self, frame: &DispatchFrame, out: &mut Vec<Routed>) {
        let guild_ids: Vec<Snowflake> = frame
            .data
            .get("guilds")
            .and_then(Value::as_array)
            .map(|guilds| {
                guilds
                    .iter()
                    .filter_map(|g| g.get("id").and_then(Snowflake::from_value))
                    .collect()
            })
            .unwrap_or_default();

        self.barrier.set_mode(BarrierMode::Startup);
        self.startup_user = frame.data.get("user").cloned();
        self.startup_guilds = guild_ids.len();
        self.chunks_requested = false;
        for id in guild_ids {
            self.barrier.register(id);
        }
        tracing::debug!(guilds = self.startup_guilds, "Startup payload received");
        self.check_startup(out);
    }

    fn on_resumed(&mut self, out: &mut Vec<Routed>) {
        if self.barrier.mode() != BarrierMode::Resume {
            out.push(Routed::Resumed { replayed: 0 });
            return;
        }
        out.push(Routed::Resumed {
            replayed: self.barrier.global_len(),
        });
        self.barrier.set_mode(BarrierMode::Open);
        for frame in self.barrier.take_global() {
            self.gate(frame, out);
        }
    }

    fn on_guild_create(&mut self, frame: DispatchFrame, out: &mut Vec<Routed>) {
        let Some(guild_id) = frame.guild_scope() else {
            self.release(frame, out);
            return;
        };
        match self.barrier.mode() {
            BarrierMode::AwaitingReady => self.barrier.push_global(frame),
            _ if self.awaits_payload(guild_id) => {
                self.on_tracked_guild(guild_id, frame, out);
                self.check_startup(out);
            }
            _ => self.on_joined_guild(guild_id, frame, out),
        }
    }

    /// A tracked guild whose payload has not arrived, or that is in an outage
    fn awaits_payload(&self, guild_id: Snowflake) -> bool {
        self.barrier
            .state(guild_id)
            .is_some_and(|state| !state.acknowledged || state.unavailable)
    }

    fn on_tracked_guild(&mut self, guild_id: Snowflake, frame: DispatchFrame, out: &mut Vec<Routed>) {
        let startup = self
            .barrier
            .state(guild_id)
            .is_some_and(|state| state.startup);

        if frame.is_unavailable() {
            if let Some(state) = self.barrier.state_mut(guild_id) {
                state.acknowledge(true, false);
            }
            self.announce(startup, frame, out);
            return;
        }

        let (included, expected) = member_counts(&frame);
        if included >= expected {
            if let Some(mut state) = self.barrier.remove(guild_id) {
                self.announce(startup, frame, out);
                self.release_buffer(&mut state.buffer, out);
            }
            return;
        }

        // Batched requests go out once every startup guild has answered
        let request_now = self.barrier.mode() != BarrierMode::Startup || self.chunks_requested;
        let seed = included_members(&frame);
        if let Some(state) = self.barrier.state_mut(guild_id) {
            state.acknowledge(false, true);
            state.interrupted = false;
            state.requested = request_now;
            state.expected_members = expected;
            state.received_members = included;
            state.create = Some(frame);
        }
        self.chunks.expect(guild_id, expected, seed);
        if request_now {
            out.push(Routed::RequestMembers(vec![guild_id]));
        }
    }

    /// A guild arriving outside the startup set
    fn on_joined_guild(&mut self, guild_id: Snowflake, frame: DispatchFrame, out: &mut Vec<Routed>) {
        if self.barrier.is_loading(guild_id) {
            self.gate(frame, out);
            return;
        }
        let (included, expected) = member_counts(&frame);
        if frame.is_unavailable() || included >= expected {
            self.release(frame, out);
            return;
        }

        let seed = included_members(&frame);
        let mut state = GuildLoadState::new(guild_id);
        state.acknowledge(false, true);
        state.requested = true;
        state.expected_members = expected;
        state.received_members = included;
        state.create = Some(frame);
        self.barrier.insert(state);
        self.chunks.expect(guild_id, expected, seed);
        out.push(Routed::RequestMembers(vec![guild_id]));
    }

    fn on_guild_delete(&mut self, frame: DispatchFrame, out: &mut Vec<Routed>) {
        let Some(guild_id) = frame.guild_scope().filter(|id| self.barrier.is_loading(*id)) else {
            self.gate(frame, out);
            return;
        };
        let startup = self.barrier.mode() == BarrierMode::Startup;

        // Mid-load outage: nothing partial is released, the guild reloads
        // with its next create
        if frame.is_unavailable() {
            let Some(state) = self.barrier.state_mut(guild_id) else {
                return;
            };
            if state.unavailable {
                return;
            }
            state.interrupt();
            let announced = state.startup;
            self.chunks.cancel(guild_id);
            tracing::debug!(guild_id = %guild_id, "Guild went unavailable while loading");
            let outage = DispatchFrame::new(
                DispatchKind::GuildCreate.as_str(),
                frame.sequence,
                serde_json::json!({"id": guild_id.to_string(), "unavailable": true}),
            );
            self.announce(announced, outage, out);
            self.check_startup(out);
            return;
        }

        self.chunks.cancel(guild_id);
        if let Some(state) = self.barrier.remove(guild_id) {
            for held in state.into_frames() {
                self.release(held, out);
            }
        }
        self.release(frame, out);
        if startup {
            self.check_startup(out);
        }
    }

    fn on_members_chunk(&mut self, frame: DispatchFrame, out: &mut Vec<Routed>) {
        let Some(guild_id) = frame
            .data
            .get("guild_id")
            .and_then(Snowflake::from_value)
            .filter(|id| self.chunks.is_pending(*id))
        else {
            self.gate(frame, out);
            return;
        };

        let members = included_members(&frame);
        if let Some(state) = self.barrier.state_mut(guild_id) {
            state.received_members += members.len() as u64;
        }
        if let Some(members) = self.chunks.on_chunk(guild_id, members) {
            self.complete_guild(guild_id, members, out);
        }
    }

    fn complete_guild(&mut self, guild_id: Snowflake, members: Vec<Value>, out: &mut Vec<Routed>) {
        let Some(mut state) = self.barrier.remove(guild_id) else {
            return;
        };
        tracing::debug!(guild_id = %guild_id, members = members.len(), "Guild loaded");

        if let Some(create) = state.create.take() {
            self.announce(state.startup, create, out);
        }
        out.push(Routed::Members { guild_id, members });
        self.release_buffer(&mut state.buffer, out);

        if self.barrier.mode() == BarrierMode::Startup {
            self.check_startup(out);
        }
    }

    fn check_startup(&mut self, out: &mut Vec<Routed>) {
        if self.barrier.mode() != BarrierMode::Startup {
            return;
        }
        if self.barrier.is_settled() {
            self.finish_startup(out);
            return;
        }
        if !self.chunks_requested && self.barrier.all_acknowledged() {
            self.chunks_requested = true;
            let ids = self.barrier.take_unrequested();
            out.extend(request_batches(&ids).into_iter().map(Routed::RequestMembers));
        }
    }

    fn finish_startup(&mut self, out: &mut Vec<Routed>) {
        let unavailable = self.barrier.unavailable_count();
        out.push(Routed::Ready {
            user: self.startup_user.take(),
            guilds: self.startup_guilds,
            unavailable,
        });

        let mut frames = self.barrier.take_global();
        frames.extend(self.barrier.take_unavailable());
        self.barrier.set_mode(BarrierMode::Open);
        tracing::debug!(
            replayed = frames.len(),
            unavailable,
            "Startup complete, releasing buffered frames"
        );
        // Member deltas were counted on arrival; replayed frames are only gated
        for frame in frames {
            self.gate(frame, out);
        }
    }

    fn adjust(&mut self, frame: &DispatchFrame, delta: i64) {
        if let Some(guild_id) = frame.guild_scope() {
            self.chunks.adjust(guild_id, delta);
        }
    }

    fn gate(&mut self, frame: DispatchFrame, out: &mut Vec<Routed>) {
        if let Some(frame) = self.barrier.gate(frame) {
            out.push(Routed::Deliver(frame));
        }
    }

    /// A guild's own payload: silent while the startup set loads, otherwise
    /// released like any frame
    fn announce(&mut self, startup_guild: bool, frame: DispatchFrame, out: &mut Vec<Routed>) {
        if startup_guild && self.barrier.mode() == BarrierMode::Startup {
            out.push(Routed::StartupGuild(frame));
        } else {
            self.release(frame, out);
        }
    }

    /// Frames a guild held while loading, behind the connection-wide ones
    fn release_buffer(&mut self, buffer: &mut ReplayBuffer, out: &mut Vec<Routed>) {
        if self.barrier.is_buffering() {
            self.barrier.append_global(buffer);
        } else {
            out.extend(buffer.drain().map(Routed::Deliver));
        }
    }

    /// Deliver unless the whole connection is buffering
    fn release(&mut self, frame: DispatchFrame, out: &mut Vec<Routed>) {
        if self.barrier.is_buffering() {
            self.barrier.push_global(frame);
        } else {
            out.push(Routed::Deliver(frame));
        }
    }
}

fn included_members(frame: &DispatchFrame) -> Vec<Value> {
    frame
        .data
        .get("members")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// (members included in the payload, declared member count)
fn member_counts(frame: &DispatchFrame) -> (u64, u64) {
    let included = frame
        .data
        .get("members")
        .and_then(Value::as_array)
        .map_or(0, |m| m.len() as u64);
    let expected = frame
        .data
        .get("member_count")
        .and_then(Value::as_u64)
        .unwrap_or(included);
    (included, expected)
}
