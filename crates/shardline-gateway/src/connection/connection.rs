//! Gateway link handle
//!
//! A [`GatewayLink`] is the caller's side of one shard's connection. The
//! connection itself runs as a task that owns all per-connection state; the
//! handle talks to it over a channel.

use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use shardline_common::ClientConfig;
use shardline_core::{ConnectionState, EntityBuilder, EventDispatcher, ShardInfo, Snowflake};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::runner::LinkRunner;
use crate::chunking::request_batches;
use crate::coordinator::SessionCoordinator;
use crate::error::{GatewayError, GatewayResult};
use crate::heartbeat::latency_from;
use crate::pacer::Lane;
use crate::protocol::{
    GatewayMessage, PresenceUpdatePayload, RequestGuildMembersPayload, VoiceStateUpdatePayload,
};
use crate::transport::GatewayTransport;

/// Per-link settings
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub token: String,
    /// Gateway URL without query string
    pub url: String,
    pub version: u8,
    pub large_threshold: u16,
    pub intents: u64,
    pub presence: Option<PresenceUpdatePayload>,
    pub auto_reconnect: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub identify_delay: Duration,
    pub heartbeat_watchdog: bool,
}

impl LinkSettings {
    pub fn from_config(config: &ClientConfig, url: impl Into<String>) -> Self {
        Self {
            token: config.token.clone(),
            url: url.into(),
            version: config.gateway.version,
            large_threshold: config.gateway.large_threshold,
            intents: config.gateway.intents,
            presence: None,
            auto_reconnect: config.reconnect.auto_reconnect,
            base_delay: config.reconnect.base_delay(),
            max_delay: config.reconnect.max_delay(),
            identify_delay: config.reconnect.identify_delay(),
            heartbeat_watchdog: config.reconnect.heartbeat_watchdog,
        }
    }

    /// Connect URL with version and encoding
    pub fn connect_url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        if base.contains('?') {
            format!("{base}&v={}&encoding=json", self.version)
        } else {
            format!("{base}/?v={}&encoding=json", self.version)
        }
    }
}

/// Collaborators shared by every link of a client
#[derive(Clone)]
pub struct LinkDeps {
    pub transport: Arc<dyn GatewayTransport>,
    pub coordinator: SessionCoordinator,
    pub builder: Arc<dyn EntityBuilder>,
    pub dispatcher: Arc<EventDispatcher>,
}

pub(crate) enum LinkCommand {
    Send(Lane, GatewayMessage),
    Shutdown,
}

/// Handle to one running shard connection
pub struct GatewayLink {
    shard: ShardInfo,
    commands: mpsc::UnboundedSender<LinkCommand>,
    status: watch::Receiver<ConnectionState>,
    latency: Arc<AtomicI64>,
    task: JoinHandle<()>,
}

impl GatewayLink {
    /// Start the connection task
    pub fn spawn(shard: ShardInfo, settings: LinkSettings, deps: LinkDeps) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionState::Initializing);
        let runner = LinkRunner::new(shard, settings, deps, receiver, status_tx);
        let latency = runner.latency_handle();
        let task = tokio::spawn(runner.run());
        tracing::info!(shard = %shard, "Gateway link started");
        Self {
            shard,
            commands,
            status,
            latency,
            task,
        }
    }

    pub fn shard(&self) -> ShardInfo {
        self.shard
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Stream of status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        latency_from(&self.latency)
    }

    pub fn update_presence(&self, presence: &PresenceUpdatePayload) -> GatewayResult<()> {
        self.send(Lane::Application, GatewayMessage::presence_update(presence)?)
    }

    pub fn update_voice_state(&self, voice: &VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.send(Lane::Application, GatewayMessage::voice_state_update(voice)?)
    }

    /// Ask for every member of the given guilds, 50 guilds per request
    pub fn request_members(&self, guild_ids: &[Snowflake]) -> GatewayResult<()> {
        for batch in request_batches(guild_ids) {
            let payload = RequestGuildMembersPayload::all(batch);
            self.send(
                Lane::Application,
                GatewayMessage::request_guild_members(&payload)?,
            )?;
        }
        Ok(())
    }

    fn send(&self, lane: Lane, message: GatewayMessage) -> GatewayResult<()> {
        self.commands
            .send(LinkCommand::Send(lane, message))
            .map_err(|_| GatewayError::Shutdown)
    }

    /// Close with 1000 and stop reconnecting
    pub fn shutdown(&self) {
        let _ = self.commands.send(LinkCommand::Shutdown);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the connection task to end
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(shard = %self.shard, error = %e, "Gateway link task failed");
        }
    }
}

impl std::fmt::Debug for GatewayLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayLink")
            .field("shard", &self.shard)
            .field("status", &self.status())
            .finish()
    }
}
