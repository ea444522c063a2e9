//! Link manager
//!
//! Holds every shard link of a client in a `DashMap` keyed by shard id, so
//! callers on any task can look links up, broadcast to them or route a
//! guild's traffic to the shard that owns it.

use dashmap::DashMap;
use shardline_core::{ConnectionState, ShardInfo, Snowflake};
use std::time::Duration;

use super::GatewayLink;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{PresenceUpdatePayload, VoiceStateUpdatePayload};

/// All running links of one client
pub struct LinkManager {
    links: DashMap<u32, GatewayLink>,
}

impl LinkManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
        }
    }

    /// Register a link, returning one it replaces
    pub fn insert(&self, link: GatewayLink) -> Option<GatewayLink> {
        let shard = link.shard();
        tracing::debug!(shard = %shard, "Link registered");
        self.links.insert(shard.id, link)
    }

    /// Remove a link so it can be joined
    pub fn remove(&self, shard_id: u32) -> Option<GatewayLink> {
        self.links.remove(&shard_id).map(|(_, link)| link)
    }

    pub fn contains(&self, shard_id: u32) -> bool {
        self.links.contains_key(&shard_id)
    }

    pub fn status(&self, shard_id: u32) -> Option<ConnectionState> {
        self.links.get(&shard_id).map(|link| link.status())
    }

    pub fn latency(&self, shard_id: u32) -> Option<Duration> {
        self.links.get(&shard_id).and_then(|link| link.latency())
    }

    /// Status of every link, ordered by shard id
    pub fn statuses(&self) -> Vec<(ShardInfo, ConnectionState)> {
        let mut statuses: Vec<_> = self
            .links
            .iter()
            .map(|link| (link.shard(), link.status()))
            .collect();
        statuses.sort_by_key(|(shard, _)| shard.id);
        statuses
    }

    /// Mean latency over links that have one
    pub fn average_latency(&self) -> Option<Duration> {
        let samples: Vec<Duration> = self.links.iter().filter_map(|l| l.latency()).collect();
        let count = u32::try_from(samples.len()).ok().filter(|n| *n > 0)?;
        Some(samples.iter().sum::<Duration>() / count)
    }

    /// Whether every link finished loading
    pub fn all_connected(&self) -> bool {
        !self.links.is_empty()
            && self
                .links
                .iter()
                .all(|link| link.status() == ConnectionState::Connected)
    }

    /// Shard id receiving the guild's events
    pub fn shard_for(&self, guild_id: Snowflake) -> Option<u32> {
        let count = self.links.iter().next()?.shard().count;
        Some(ShardInfo::shard_id_for(guild_id, count))
    }

    /// Send a presence update on every link
    pub fn update_presence(&self, presence: &PresenceUpdatePayload) -> GatewayResult<()> {
        for link in &self.links {
            link.update_presence(presence)?;
        }
        Ok(())
    }

    /// Send a voice update on the link owning the guild
    pub fn update_voice_state(&self, voice: &VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.owning(voice.guild_id)?.update_voice_state(voice)
    }

    /// Request members, each guild on the link that owns it
    pub fn request_members(&self, guild_ids: &[Snowflake]) -> GatewayResult<()> {
        for link in &self.links {
            let shard = link.shard();
            let owned: Vec<_> = guild_ids.iter().copied().filter(|g| shard.owns(*g)).collect();
            if !owned.is_empty() {
                link.request_members(&owned)?;
            }
        }
        Ok(())
    }

    fn owning(
        &self,
        guild_id: Snowflake,
    ) -> GatewayResult<dashmap::mapref::one::Ref<'_, u32, GatewayLink>> {
        self.shard_for(guild_id)
            .and_then(|id| self.links.get(&id))
            .ok_or(GatewayError::Shutdown)
    }

    /// Ask every link to close
    pub fn shutdown_all(&self) {
        for link in &self.links {
            link.shutdown();
        }
    }

    /// Take every link out, ordered by shard id
    pub fn drain(&self) -> Vec<GatewayLink> {
        let mut ids: Vec<u32> = self.links.iter().map(|l| *l.key()).collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("links", &self.links.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{LinkDeps, LinkSettings};
    use crate::coordinator::{SessionCoordinator, IDENTIFY_DELAY};
    use crate::transport::testing::{FakeServer, FakeTransport};
    use crate::transport::GatewayTransport;
    use serde_json::json;
    use shardline_core::{EntityBuilder, EntityCache, EventDispatcher};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn settings() -> LinkSettings {
        LinkSettings {
            token: "token".into(),
            url: "wss://gateway.test".into(),
            version: 10,
            large_threshold: 250,
            intents: 0,
            presence: None,
            auto_reconnect: true,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(900),
            identify_delay: IDENTIFY_DELAY,
            heartbeat_watchdog: true,
        }
    }

    fn spawn_all(count: u32) -> (LinkManager, mpsc::UnboundedReceiver<FakeServer>) {
        let (transport, servers) = FakeTransport::new();
        let deps = LinkDeps {
            transport: Arc::new(transport) as Arc<dyn GatewayTransport>,
            coordinator: SessionCoordinator::new(Duration::ZERO),
            builder: Arc::new(EntityCache::new()) as Arc<dyn EntityBuilder>,
            dispatcher: Arc::new(EventDispatcher::new()),
        };
        let manager = LinkManager::new();
        for id in 0..count {
            manager.insert(GatewayLink::spawn(
                ShardInfo::new(id, count),
                settings(),
                deps.clone(),
            ));
        }
        (manager, servers)
    }

    /// Identify and finish startup, returning the shard id the link sent
    async fn identified(server: &mut FakeServer) -> u32 {
        server.send_text(json!({"op": 10, "d": {"heartbeat_interval": 45_000}}).to_string());
        let shard = loop {
            let frame = server.recv_json().await.unwrap();
            if frame["op"] == 2 {
                break frame["d"]["shard"][0].as_u64().unwrap() as u32;
            }
        };
        server.send_text(
            json!({"op": 0, "t": "READY", "s": 1, "d": {"session_id": "s", "guilds": []}})
                .to_string(),
        );
        shard
    }

    async fn next_op(server: &mut FakeServer, op: u64) -> serde_json::Value {
        loop {
            let frame = server.recv_json().await.unwrap();
            if frame["op"] == op {
                return frame;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_tracks_links() {
        let (manager, _servers) = spawn_all(2);
        assert_eq!(manager.len(), 2);
        assert!(manager.contains(1));
        assert!(!manager.contains(2));
        assert!(!manager.all_connected());
        assert_eq!(manager.statuses().len(), 2);
        assert!(manager.average_latency().is_none());

        let guild = Snowflake::new(175_928_847_299_117_063);
        assert_eq!(manager.shard_for(guild), Some(ShardInfo::shard_id_for(guild, 2)));

        let drained = manager.drain();
        assert!(manager.is_empty());
        assert_eq!(drained.iter().map(|l| l.shard().id).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_requests_follow_guild_ownership() {
        let (manager, mut servers) = spawn_all(2);
        let mut by_shard = std::collections::HashMap::new();
        for _ in 0..2 {
            let mut server = servers.recv().await.unwrap();
            let shard = identified(&mut server).await;
            by_shard.insert(shard, server);
        }

        // Shard = (id >> 22) % 2
        let even = Snowflake::new(2 << 22);
        let odd = Snowflake::new(3 << 22);
        manager.request_members(&[even, odd]).unwrap();

        let frame = next_op(by_shard.get_mut(&0).unwrap(), 8).await;
        assert_eq!(frame["d"]["guild_id"], json!([even.to_string()]));
        let frame = next_op(by_shard.get_mut(&1).unwrap(), 8).await;
        assert_eq!(frame["d"]["guild_id"], json!([odd.to_string()]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_all_stops_every_link() {
        let (manager, _servers) = spawn_all(3);
        manager.shutdown_all();
        for link in manager.drain() {
            link.join().await;
        }
    }
}
