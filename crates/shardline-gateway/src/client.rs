//! Multi-shard client
//!
//! Resolves where to connect and how many shards to run, then starts one
//! link per shard. All links share the identify coordinator, the entity
//! builder and the event dispatcher.

use std::sync::Arc;

use shardline_common::ClientConfig;
use shardline_core::{
    ConnectionState, EntityBuilder, EntityCache, Event, EventDispatcher, EventListener, ShardInfo,
    Snowflake,
};
use shardline_rest::RestGateway;
use tokio::sync::broadcast;

use crate::connection::{GatewayLink, LinkDeps, LinkManager, LinkSettings};
use crate::coordinator::SessionCoordinator;
use crate::error::GatewayResult;
use crate::protocol::{PresenceUpdatePayload, VoiceStateUpdatePayload};
use crate::transport::{GatewayTransport, TungsteniteTransport};

/// Builder for a [`GatewayClient`]
pub struct GatewayClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn GatewayTransport>>,
    rest: Option<RestGateway>,
    builder: Option<Arc<dyn EntityBuilder>>,
    dispatcher: Option<Arc<EventDispatcher>>,
    presence: Option<PresenceUpdatePayload>,
}

impl GatewayClientBuilder {
    /// Socket transport, `tokio-tungstenite` by default
    pub fn transport(mut self, transport: Arc<dyn GatewayTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// REST gateway, built from the config by default
    pub fn rest(mut self, rest: RestGateway) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Entity builder, an [`EntityCache`] by default
    pub fn entity_builder(mut self, builder: Arc<dyn EntityBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Presence sent with every identify
    pub fn presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Resolve the gateway and start every shard
    pub async fn start(self) -> GatewayResult<GatewayClient> {
        let config = self.config;
        let rest = match self.rest {
            Some(rest) => rest,
            None => RestGateway::from_config(&config.rest, &config.token)?,
        };

        let (url, shard_count) = match (&config.gateway.url, config.shards.count) {
            (Some(url), Some(count)) => (url.clone(), count),
            (url, count) => {
                let bot = rest.gateway_bot().await?;
                tracing::info!(
                    url = %bot.url,
                    shards = bot.shards,
                    "Resolved gateway from the REST API"
                );
                (
                    url.clone().unwrap_or(bot.url),
                    count.unwrap_or(bot.shards),
                )
            }
        };
        let shard_count = shard_count.max(1);

        let mut settings = LinkSettings::from_config(&config, url);
        settings.presence = self.presence;

        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(EventDispatcher::new()));
        let builder = self
            .builder
            .unwrap_or_else(|| Arc::new(EntityCache::new()) as Arc<dyn EntityBuilder>);
        let coordinator = SessionCoordinator::new(config.reconnect.identify_delay());
        let deps = LinkDeps {
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(TungsteniteTransport) as Arc<dyn GatewayTransport>),
            coordinator: coordinator.clone(),
            builder: Arc::clone(&builder),
            dispatcher: Arc::clone(&dispatcher),
        };

        tracing::info!(
            app = %config.app.name,
            url = %settings.url,
            shards = shard_count,
            "Starting gateway client"
        );
        let links = LinkManager::new();
        for id in 0..shard_count {
            let shard = ShardInfo::new(id, shard_count);
            links.insert(GatewayLink::spawn(shard, settings.clone(), deps.clone()));
        }

        Ok(GatewayClient {
            shard_count,
            rest,
            coordinator,
            builder,
            dispatcher,
            links,
        })
    }
}

/// Running client: one link per shard
pub struct GatewayClient {
    shard_count: u32,
    rest: RestGateway,
    coordinator: SessionCoordinator,
    builder: Arc<dyn EntityBuilder>,
    dispatcher: Arc<EventDispatcher>,
    links: LinkManager,
}

impl GatewayClient {
    pub fn builder(config: ClientConfig) -> GatewayClientBuilder {
        GatewayClientBuilder {
            config,
            transport: None,
            rest: None,
            builder: None,
            dispatcher: None,
            presence: None,
        }
    }

    /// Start with every default collaborator
    pub async fn start(config: ClientConfig) -> GatewayResult<Self> {
        Self::builder(config).start().await
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn links(&self) -> &LinkManager {
        &self.links
    }

    pub fn rest(&self) -> &RestGateway {
        &self.rest
    }

    pub fn entity_builder(&self) -> &Arc<dyn EntityBuilder> {
        &self.builder
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.dispatcher.add_listener(listener);
    }

    /// Receive every event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.dispatcher.subscribe()
    }

    pub fn status(&self, shard_id: u32) -> Option<ConnectionState> {
        self.links.status(shard_id)
    }

    pub fn update_presence(&self, presence: &PresenceUpdatePayload) -> GatewayResult<()> {
        self.links.update_presence(presence)
    }

    pub fn update_voice_state(&self, voice: &VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.links.update_voice_state(voice)
    }

    pub fn request_members(&self, guild_ids: &[Snowflake]) -> GatewayResult<()> {
        self.links.request_members(guild_ids)
    }

    /// Close every link with 1000 and wait for them to stop
    pub async fn shutdown(&self) {
        tracing::info!(shards = self.shard_count, "Shutting down gateway client");
        self.coordinator.stop();
        self.links.shutdown_all();
        self.rest.shutdown();
        for link in self.links.drain() {
            link.join().await;
        }
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("shard_count", &self.shard_count)
            .field("links", &self.links)
            .field("rest", &self.rest)
            .finish()
    }
}
