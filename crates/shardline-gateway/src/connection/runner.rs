//! Gateway link task
//!
//! One task per shard owns the session, the dispatch router, the outbound
//! pacer and the heartbeat. A spawned reader forwards socket events over a
//! channel; everything else happens in this task's `select!` loop.

use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shardline_core::{ConnectionState, Event, ShardInfo};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use super::connection::{LinkCommand, LinkDeps, LinkSettings};
use super::Session;
use crate::backoff::ReconnectBackoff;
use crate::coordinator::IdentifyPermit;
use crate::error::GatewayResult;
use crate::events::{DispatchFrame, DispatchKind};
use crate::heartbeat::{Beat, Heartbeat};
use crate::pacer::{Lane, OutboundPacer};
use crate::protocol::{
    CloseAction, CloseCode, GatewayMessage, IdentifyPayload, IdentifyProperties, OpCode,
    RequestGuildMembersPayload,
};
use crate::router::{DispatchRouter, Routed};
use crate::transport::{SocketCommand, SocketEvent, SocketSink, SocketStream};

/// How a socket ended
#[derive(Debug)]
enum Outcome {
    /// Reconnect after `delay`, or after the backoff when `None`
    Reconnect {
        code: Option<u16>,
        delay: Option<Duration>,
    },
    /// Never reconnect
    Fatal {
        code: Option<u16>,
        reason: String,
        login_failed: bool,
    },
    /// Shutdown requested through the handle
    Shutdown,
}

impl Outcome {
    fn code(&self) -> Option<u16> {
        match self {
            Self::Reconnect { code, .. } | Self::Fatal { code, .. } => *code,
            Self::Shutdown => Some(CloseCode::Graceful.as_u16()),
        }
    }

    fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            code: None,
            reason: reason.into(),
            login_failed: false,
        }
    }

    fn immediate(code: CloseCode) -> Self {
        Self::Reconnect {
            code: Some(code.as_u16()),
            delay: Some(Duration::ZERO),
        }
    }
}

/// What one socket event asks of the loop
enum Flow {
    Continue,
    /// The socket is already gone
    End(Outcome),
    /// Close the socket ourselves
    Close {
        code: CloseCode,
        reason: &'static str,
        outcome: Outcome,
    },
}

pub(crate) struct LinkRunner {
    shard: ShardInfo,
    settings: LinkSettings,
    deps: LinkDeps,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    status: watch::Sender<ConnectionState>,
    session: Session,
    router: DispatchRouter,
    pacer: OutboundPacer,
    heartbeat: Heartbeat,
    backoff: ReconnectBackoff,
    permit: Option<IdentifyPermit>,
}

impl LinkRunner {
    pub(crate) fn new(
        shard: ShardInfo,
        settings: LinkSettings,
        deps: LinkDeps,
        commands: mpsc::UnboundedReceiver<LinkCommand>,
        status: watch::Sender<ConnectionState>,
    ) -> Self {
        let backoff = ReconnectBackoff::new(settings.base_delay, settings.max_delay);
        let heartbeat = Heartbeat::new(settings.heartbeat_watchdog);
        Self {
            shard,
            settings,
            deps,
            commands,
            status,
            session: Session::new(),
            router: DispatchRouter::new(),
            pacer: OutboundPacer::new(),
            heartbeat,
            backoff,
            permit: None,
        }
    }

    pub(crate) fn latency_handle(&self) -> Arc<AtomicI64> {
        self.heartbeat.latency_handle()
    }

    pub(crate) async fn run(mut self) {
        loop {
            if !self.session.can_resume() {
                match self.wait_for_turn().await {
                    Ok(permit) => self.permit = Some(permit),
                    Err(outcome) => {
                        self.terminate(outcome);
                        break;
                    }
                }
            }

            let resuming = self.session.can_resume();
            self.set_state(if resuming {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });
            let base = match self.session.resume_url() {
                Some(url) if resuming => url,
                _ => self.settings.url.as_str(),
            };
            let url = self.settings.connect_url(base);
            tracing::debug!(shard = %self.shard, url = %url, resuming, "Opening gateway socket");

            let outcome = match self.deps.transport.connect(&url).await {
                Ok(socket) => self.drive(socket).await,
                Err(e) => {
                    tracing::warn!(shard = %self.shard, error = %e, "Gateway connect failed");
                    Outcome::Reconnect {
                        code: None,
                        delay: None,
                    }
                }
            };

            // Releases the coordinator for the next link
            self.permit = None;
            self.heartbeat.stop();
            self.pacer.on_disconnect();
            self.set_state(ConnectionState::Disconnected);
            self.emit(Event::Disconnected {
                shard: self.shard,
                code: outcome.code(),
            });

            let (code, delay) = match outcome {
                Outcome::Reconnect { code, delay } => (code, delay),
                terminal => {
                    self.terminate(terminal);
                    break;
                }
            };
            if !self.settings.auto_reconnect {
                self.terminate(Outcome::Fatal {
                    code,
                    reason: "Automatic reconnect disabled".to_string(),
                    login_failed: false,
                });
                break;
            }

            let delay = delay.unwrap_or_else(|| self.backoff.next_delay());
            self.set_state(ConnectionState::WaitingToReconnect);
            tracing::info!(
                shard = %self.shard,
                delay_ms = delay.as_millis() as u64,
                resume = self.session.can_resume(),
                "Reconnecting"
            );
            if let Err(outcome) = self.wait(delay).await {
                self.terminate(outcome);
                break;
            }
        }
    }

    /// Wait for a coordinator turn before a fresh identify
    async fn wait_for_turn(&mut self) -> Result<IdentifyPermit, Outcome> {
        self.set_state(ConnectionState::QueuedToReconnect);
        let ticket = self
            .deps
            .coordinator
            .submit(self.shard)
            .map_err(|e| Outcome::fatal(e.to_string()))?;
        let granted = ticket.granted();
        tokio::pin!(granted);
        loop {
            tokio::select! {
                result = &mut granted => {
                    return result.map_err(|e| Outcome::fatal(e.to_string()));
                }
                command = self.commands.recv() => {
                    if !self.on_idle_command(command) {
                        self.deps.coordinator.remove(self.shard);
                        return Err(Outcome::Shutdown);
                    }
                }
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> Result<(), Outcome> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return Ok(()),
                command = self.commands.recv() => {
                    if !self.on_idle_command(command) {
                        return Err(Outcome::Shutdown);
                    }
                }
            }
        }
    }

    /// Queue outbound frames while no socket is open; false means stop
    fn on_idle_command(&mut self, command: Option<LinkCommand>) -> bool {
        match command {
            Some(LinkCommand::Send(lane, message)) => {
                self.pacer.push(lane, message);
                true
            }
            Some(LinkCommand::Shutdown) | None => false,
        }
    }

    async fn drive(&mut self, (mut sink, stream): (SocketSink, SocketStream)) -> Outcome {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_socket(stream, events_tx));
        self.set_state(ConnectionState::Identifying);

        let outcome = self.socket_loop(&mut sink, &mut events).await;
        reader.abort();
        outcome
    }

    async fn socket_loop(
        &mut self,
        sink: &mut SocketSink,
        events: &mut mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Outcome {
        loop {
            let beat_at = self.heartbeat.next_due();
            let pace_at = self.pacer.next_ready(Instant::now());

            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(LinkCommand::Send(lane, message)) => {
                        self.pacer.push(lane, message);
                        Flow::Continue
                    }
                    Some(LinkCommand::Shutdown) | None => Flow::Close {
                        code: CloseCode::Graceful,
                        reason: "Shutdown requested",
                        outcome: Outcome::Shutdown,
                    },
                },
                event = events.recv() => self.on_socket_event(event),
                () = until(beat_at) => self.on_beat(),
                () = until(pace_at) => Flow::Continue,
            };

            match flow {
                Flow::Continue => {}
                Flow::End(outcome) => return outcome,
                Flow::Close {
                    code,
                    reason,
                    outcome,
                } => {
                    if let Err(e) = sink
                        .send(SocketCommand::Close(code.as_u16(), reason.to_string()))
                        .await
                    {
                        tracing::debug!(shard = %self.shard, error = %e, "Close frame not sent");
                    }
                    return outcome;
                }
            }

            if let Err(e) = self.flush(sink).await {
                tracing::warn!(shard = %self.shard, error = %e, "Gateway send failed");
                return Outcome::Reconnect {
                    code: None,
                    delay: None,
                };
            }
        }
    }

    /// Write every frame the pacer allows right now
    async fn flush(&mut self, sink: &mut SocketSink) -> GatewayResult<()> {
        while let Some(message) = self.pacer.poll(Instant::now()) {
            let text = message.to_json()?;
            tracing::trace!(shard = %self.shard, op = %message.op, "Sending frame");
            sink.send(SocketCommand::Text(text)).await?;
        }
        Ok(())
    }

    fn on_socket_event(&mut self, event: Option<SocketEvent>) -> Flow {
        match event {
            Some(SocketEvent::Text(text)) => self.on_text(&text),
            Some(SocketEvent::Closed { code, reason }) => Flow::End(self.on_close(code, &reason)),
            Some(SocketEvent::Error(error)) => {
                tracing::warn!(shard = %self.shard, error = %error, "Gateway socket error");
                Flow::End(Outcome::Reconnect {
                    code: None,
                    delay: None,
                })
            }
            None => Flow::End(Outcome::Reconnect {
                code: None,
                delay: None,
            }),
        }
    }

    fn on_text(&mut self, text: &str) -> Flow {
        let message = match GatewayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(shard = %self.shard, error = %e, "Skipping undecodable frame");
                return Flow::Continue;
            }
        };
        tracing::trace!(shard = %self.shard, op = %message.op, "Received frame");

        match message.op {
            OpCode::Hello => {
                match message.as_hello() {
                    Some(hello) => self.on_hello(Duration::from_millis(hello.heartbeat_interval)),
                    None => tracing::warn!(shard = %self.shard, "Hello without heartbeat interval"),
                }
                Flow::Continue
            }
            OpCode::Heartbeat => {
                self.pacer
                    .push(Lane::Critical, GatewayMessage::heartbeat(self.session.sequence()));
                self.heartbeat.mark_sent(Instant::now());
                Flow::Continue
            }
            OpCode::HeartbeatAck => {
                self.heartbeat.on_ack(Instant::now());
                Flow::Continue
            }
            OpCode::Reconnect => {
                tracing::info!(shard = %self.shard, "Gateway requested a reconnect");
                Flow::Close {
                    code: CloseCode::UnknownError,
                    reason: "Reconnect requested",
                    outcome: Outcome::immediate(CloseCode::UnknownError),
                }
            }
            OpCode::InvalidSession => {
                self.on_invalid_session(message.as_invalid_session().unwrap_or(false))
            }
            OpCode::Dispatch => {
                self.on_dispatch(message);
                Flow::Continue
            }
            other => {
                tracing::debug!(shard = %self.shard, op = %other, "Ignoring unexpected op");
                Flow::Continue
            }
        }
    }

    /// Start heartbeating, then send the handshake
    fn on_hello(&mut self, interval: Duration) {
        self.heartbeat.start(interval, Instant::now());
        tracing::debug!(
            shard = %self.shard,
            interval_ms = interval.as_millis() as u64,
            "Heartbeat started"
        );

        let handshake = match self.session.resume_payload(&self.settings.token) {
            Some(payload) => {
                tracing::info!(
                    shard = %self.shard,
                    session_id = %payload.session_id,
                    seq = payload.seq,
                    "Resuming session"
                );
                self.router.begin_resume();
                GatewayMessage::resume(&payload)
            }
            None => {
                tracing::info!(shard = %self.shard, "Identifying");
                self.router.begin_identify();
                GatewayMessage::identify(&self.identify_payload())
            }
        };
        match handshake {
            Ok(message) => self.pacer.push(Lane::Critical, message),
            Err(e) => tracing::error!(shard = %self.shard, error = %e, "Handshake not encodable"),
        }
        self.pacer.handshake_sent();
        self.set_state(ConnectionState::AwaitingAck);
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.settings.token.clone(),
            properties: IdentifyProperties::library(),
            compress: false,
            large_threshold: self.settings.large_threshold,
            presence: self.settings.presence.clone(),
            shard: self.shard.is_sharded().then_some(self.shard),
            intents: self.settings.intents,
            v: self.settings.version,
        }
    }

    fn on_beat(&mut self) -> Flow {
        match self.heartbeat.on_due(Instant::now()) {
            Beat::Send => {
                self.pacer
                    .push(Lane::Critical, GatewayMessage::heartbeat(self.session.sequence()));
                Flow::Continue
            }
            Beat::Zombie => {
                tracing::warn!(shard = %self.shard, "Heartbeat not acknowledged, reconnecting");
                Flow::Close {
                    code: CloseCode::UnknownError,
                    reason: "Heartbeat not acknowledged",
                    outcome: Outcome::immediate(CloseCode::UnknownError),
                }
            }
        }
    }

    fn on_invalid_session(&mut self, resumable: bool) -> Flow {
        if resumable {
            tracing::warn!(shard = %self.shard, "Session invalidated, resuming");
            return Flow::Close {
                code: CloseCode::UnknownError,
                reason: "Session invalidated",
                outcome: Outcome::immediate(CloseCode::UnknownError),
            };
        }

        // Rejected right after identifying: wait before trying again
        let delay = if self.state() == ConnectionState::AwaitingAck {
            self.settings.identify_delay
        } else {
            Duration::ZERO
        };
        tracing::warn!(shard = %self.shard, "Session invalidated, identifying afresh");
        self.invalidate();
        Flow::Close {
            code: CloseCode::Graceful,
            reason: "Session invalidated",
            outcome: Outcome::Reconnect {
                code: Some(CloseCode::Graceful.as_u16()),
                delay: Some(delay),
            },
        }
    }

    /// Drop every trace of the current session
    fn invalidate(&mut self) {
        self.session.clear();
        self.router.reset();
        self.pacer.clear_control();
        self.deps.builder.invalidate(self.shard);
    }

    fn on_close(&mut self, code: Option<u16>, server_reason: &str) -> Outcome {
        let reason = CloseCode::describe(code);
        match CloseCode::classify(code) {
            CloseAction::Fatal => {
                tracing::error!(
                    shard = %self.shard,
                    code = ?code,
                    reason,
                    server_reason,
                    "Gateway closed the connection permanently"
                );
                Outcome::Fatal {
                    code,
                    reason: reason.to_string(),
                    login_failed: code == Some(CloseCode::AuthenticationFailed.as_u16())
                        && self.state() == ConnectionState::AwaitingAck,
                }
            }
            CloseAction::Reconnect => {
                let stale = matches!(
                    code.and_then(CloseCode::from_u16),
                    Some(CloseCode::InvalidSequence | CloseCode::SessionTimeout)
                );
                if stale {
                    self.invalidate();
                }
                tracing::warn!(
                    shard = %self.shard,
                    code = ?code,
                    reason,
                    server_reason,
                    "Gateway connection closed"
                );
                Outcome::Reconnect { code, delay: None }
            }
        }
    }

    fn on_dispatch(&mut self, message: GatewayMessage) {
        if let Some(sequence) = message.s {
            self.session.observe(sequence);
        }
        let Some(frame) = DispatchFrame::from_message(message) else {
            return;
        };

        match frame.known_kind() {
            Some(DispatchKind::Ready) => self.on_ready(&frame),
            Some(DispatchKind::Resumed) => {
                tracing::info!(shard = %self.shard, "Session resumed");
                self.backoff.reset();
                self.deps.coordinator.remove(self.shard);
            }
            _ => {}
        }

        for routed in self.router.route(frame) {
            self.apply(routed);
        }
    }

    fn on_ready(&mut self, frame: &DispatchFrame) {
        let session_id = frame.data.get("session_id").and_then(|v| v.as_str());
        let resume_url = frame
            .data
            .get("resume_gateway_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match session_id {
            Some(id) => self.session.start(id.to_string(), resume_url),
            None => tracing::warn!(shard = %self.shard, "Startup payload without session id"),
        }

        self.set_state(ConnectionState::SettingUp);
        if let Some(permit) = self.permit.take() {
            permit.complete();
        }
        self.backoff.reset();
    }

    fn apply(&mut self, routed: Routed) {
        match routed {
            Routed::Deliver(frame) => self.deliver(&frame),
            Routed::StartupGuild(frame) => self.cache_guild(&frame),
            Routed::Members { guild_id, members } => {
                match self.deps.builder.build_members(guild_id, &members) {
                    Ok(built) => self.emit(Event::MembersChunked {
                        shard: self.shard,
                        guild_id,
                        count: built.len(),
                    }),
                    Err(e) => tracing::warn!(
                        shard = %self.shard,
                        guild_id = %guild_id,
                        error = %e,
                        "Skipping members the entity builder rejected"
                    ),
                }
            }
            Routed::RequestMembers(guild_ids) => {
                tracing::debug!(shard = %self.shard, guilds = guild_ids.len(), "Requesting members");
                let payload = RequestGuildMembersPayload::all(guild_ids);
                match GatewayMessage::request_guild_members(&payload) {
                    Ok(message) => self.pacer.push(Lane::Control, message),
                    Err(e) => tracing::warn!(shard = %self.shard, error = %e, "Member request not encodable"),
                }
            }
            Routed::Ready {
                user,
                guilds,
                unavailable,
            } => {
                let user = user.and_then(|raw| match self.deps.builder.build_self_user(&raw) {
                    Ok(user) => Some(user),
                    Err(e) => {
                        tracing::warn!(shard = %self.shard, error = %e, "Self user not built");
                        None
                    }
                });
                tracing::info!(shard = %self.shard, guilds, unavailable, "Ready");
                self.set_state(ConnectionState::Connected);
                self.emit(Event::Ready {
                    shard: self.shard,
                    user,
                    guilds,
                    unavailable_guilds: unavailable,
                });
            }
            Routed::Resumed { replayed } => {
                self.set_state(ConnectionState::Connected);
                self.emit(Event::Resumed {
                    shard: self.shard,
                    replayed,
                });
            }
        }
    }

    fn deliver(&self, frame: &DispatchFrame) {
        match self
            .deps
            .builder
            .build_event(self.shard, &frame.kind, frame.sequence, &frame.data)
        {
            Ok(Some(event)) => self.emit(event),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                shard = %self.shard,
                kind = %frame.kind,
                error = %e,
                "Skipping dispatch the entity builder rejected"
            ),
        }
    }

    /// Guilds the session already belonged to are cached, not announced
    fn cache_guild(&self, frame: &DispatchFrame) {
        let built = self.deps.builder.build_guild(&frame.data).and_then(|guild| {
            match frame.data.get("members").and_then(|m| m.as_array()) {
                Some(members) if !guild.unavailable && !members.is_empty() => {
                    self.deps.builder.build_members(guild.id, members).map(|_| ())
                }
                _ => Ok(()),
            }
        });
        if let Err(e) = built {
            tracing::warn!(
                shard = %self.shard,
                error = %e,
                "Skipping startup guild the entity builder rejected"
            );
        }
    }

    /// Final state and shutdown event
    fn terminate(&mut self, outcome: Outcome) {
        self.deps.coordinator.remove(self.shard);
        let (code, reason, terminal) = match outcome {
            Outcome::Shutdown => {
                self.set_state(ConnectionState::ShuttingDown);
                (
                    Some(CloseCode::Graceful.as_u16()),
                    "Shutdown requested".to_string(),
                    ConnectionState::Shutdown,
                )
            }
            Outcome::Fatal {
                code,
                reason,
                login_failed,
            } => {
                let terminal = if login_failed {
                    ConnectionState::LoginFailed
                } else {
                    ConnectionState::Shutdown
                };
                (code, reason, terminal)
            }
            Outcome::Reconnect { code, .. } => (
                code,
                CloseCode::describe(code).to_string(),
                ConnectionState::Shutdown,
            ),
        };
        self.set_state(terminal);
        tracing::info!(shard = %self.shard, code = ?code, reason = %reason, "Gateway link stopped");
        self.emit(Event::Shutdown {
            shard: self.shard,
            code,
            reason,
        });
    }

    fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    fn set_state(&self, new: ConnectionState) {
        let old = self.status.send_replace(new);
        if old != new {
            tracing::debug!(shard = %self.shard, old = %old, new = %new, "Connection state changed");
            self.emit(Event::StatusChanged {
                shard: self.shard,
                old,
                new,
            });
        }
    }

    fn emit(&self, event: Event) {
        self.deps.dispatcher.dispatch(event);
    }
}

/// Forward socket events until the socket closes or the link stops reading
async fn read_socket(mut stream: SocketStream, events: mpsc::UnboundedSender<SocketEvent>) {
    while let Some(event) = stream.next().await {
        let closed = matches!(event, SocketEvent::Closed { .. });
        if events.send(event).is_err() || closed {
            return;
        }
    }
    let _ = events.send(SocketEvent::Closed {
        code: None,
        reason: String::new(),
    });
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::GatewayLink;
    use crate::coordinator::{SessionCoordinator, IDENTIFY_DELAY};
    use crate::protocol::{PresenceUpdatePayload, Status};
    use crate::transport::testing::{FakeServer, FakeTransport};
    use serde_json::{json, Value};
    use shardline_core::{EntityBuilder, EntityCache, EventDispatcher, Snowflake};
    use tokio::sync::broadcast;

    struct Harness {
        link: GatewayLink,
        servers: mpsc::UnboundedReceiver<FakeServer>,
        events: broadcast::Receiver<Event>,
        cache: Arc<EntityCache>,
        _transport: Arc<FakeTransport>,
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            token: "token".into(),
            url: "wss://gateway.test".into(),
            version: 10,
            large_threshold: 250,
            intents: 3,
            presence: None,
            auto_reconnect: true,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(900),
            identify_delay: IDENTIFY_DELAY,
            heartbeat_watchdog: true,
        }
    }

    fn harness(shard: ShardInfo) -> Harness {
        harness_with(shard, settings())
    }

    fn harness_with(shard: ShardInfo, settings: LinkSettings) -> Harness {
        let (transport, servers) = FakeTransport::new();
        let transport = Arc::new(transport);
        let cache = Arc::new(EntityCache::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let events = dispatcher.subscribe();
        let deps = LinkDeps {
            transport: Arc::clone(&transport) as Arc<dyn crate::transport::GatewayTransport>,
            coordinator: SessionCoordinator::new(IDENTIFY_DELAY),
            builder: Arc::clone(&cache) as Arc<dyn EntityBuilder>,
            dispatcher,
        };
        Harness {
            link: GatewayLink::spawn(shard, settings, deps),
            servers,
            events,
            cache,
            _transport: transport,
        }
    }

    impl Harness {
        async fn accept(&mut self) -> FakeServer {
            self.servers.recv().await.unwrap()
        }

        /// Next event with this name, skipping others
        async fn event(&mut self, name: &str) -> Event {
            loop {
                let event = self.events.recv().await.unwrap();
                if event.name() == name {
                    return event;
                }
            }
        }
    }

    fn hello(server: &FakeServer, interval_ms: u64) {
        server.send_text(json!({"op": 10, "d": {"heartbeat_interval": interval_ms}}).to_string());
    }

    fn dispatch(server: &FakeServer, kind: &str, seq: u64, data: Value) {
        server.send_text(json!({"op": 0, "t": kind, "s": seq, "d": data}).to_string());
    }

    fn ready(server: &FakeServer, guilds: &[&str]) {
        let guilds: Vec<_> = guilds
            .iter()
            .map(|id| json!({"id": id, "unavailable": true}))
            .collect();
        dispatch(
            server,
            "READY",
            1,
            json!({
                "session_id": "abc",
                "resume_gateway_url": "wss://resume.test",
                "user": {"id": "1", "username": "bot"},
                "guilds": guilds,
            }),
        );
    }

    /// Next frame with `op`, skipping heartbeats
    async fn expect_op(server: &mut FakeServer, op: u64) -> Value {
        loop {
            let frame = server.recv_json().await.unwrap();
            if frame["op"] == op {
                return frame;
            }
            assert_eq!(frame["op"], 1, "unexpected frame {frame}");
        }
    }

    async fn expect_close(server: &mut FakeServer) -> u16 {
        loop {
            match server.recv().await.unwrap() {
                SocketCommand::Close(code, _) => return code,
                SocketCommand::Text(_) => {}
            }
        }
    }

    async fn connect_ready(h: &mut Harness) -> FakeServer {
        let mut server = h.accept().await;
        hello(&server, 45_000);
        expect_op(&mut server, 2).await;
        ready(&server, &[]);
        h.event("READY").await;
        server
    }

    #[tokio::test(start_paused = true)]
    async fn test_identify_then_dispatch() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = h.accept().await;
        assert_eq!(server.url, "wss://gateway.test/?v=10&encoding=json");

        hello(&server, 45_000);
        let identify = expect_op(&mut server, 2).await;
        assert_eq!(identify["d"]["token"], "token");
        assert_eq!(identify["d"]["large_threshold"], 250);
        assert!(identify["d"].get("shard").is_none());

        ready(&server, &[]);
        match h.event("READY").await {
            Event::Ready { user, guilds, .. } => {
                assert_eq!(guilds, 0);
                assert_eq!(user.unwrap().username, "bot");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.link.status(), ConnectionState::Connected);

        dispatch(&server, "MESSAGE_CREATE", 2, json!({"content": "hi"}));
        match h.event("MESSAGE_CREATE").await {
            Event::Dispatch { sequence, .. } => assert_eq!(sequence, Some(2)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sharded_identify_carries_shard() {
        let mut h = harness(ShardInfo::new(1, 4));
        let mut server = h.accept().await;
        hello(&server, 45_000);
        let identify = expect_op(&mut server, 2).await;
        assert_eq!(identify["d"]["shard"], json!([1, 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_close_resumes_known_session() {
        let mut h = harness(ShardInfo::SINGLE);
        let server = connect_ready(&mut h).await;
        dispatch(&server, "MESSAGE_CREATE", 7, json!({}));
        h.event("MESSAGE_CREATE").await;

        server.close(1000);
        match h.event("DISCONNECTED").await {
            Event::Disconnected { code, .. } => assert_eq!(code, Some(1000)),
            other => panic!("unexpected event: {other:?}"),
        }

        let mut resumed = h.accept().await;
        assert!(resumed.url.starts_with("wss://resume.test/"));
        hello(&resumed, 45_000);
        let resume = expect_op(&mut resumed, 6).await;
        assert_eq!(resume["d"], json!({"token": "token", "session_id": "abc", "seq": 7}));

        dispatch(&resumed, "MESSAGE_CREATE", 8, json!({}));
        dispatch(&resumed, "RESUMED", 9, json!({}));
        match h.event("RESUMED").await {
            Event::Resumed { replayed, .. } => assert_eq!(replayed, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.link.status(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_auto_reconnect_stops() {
        let settings = LinkSettings {
            auto_reconnect: false,
            ..settings()
        };
        let mut h = harness_with(ShardInfo::SINGLE, settings);
        let server = connect_ready(&mut h).await;

        server.close(1000);
        match h.event("SHUTDOWN").await {
            Event::Shutdown { code, reason, .. } => {
                assert_eq!(code, Some(1000));
                assert_eq!(reason, "Automatic reconnect disabled");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.link.status(), ConnectionState::Shutdown);

        let next = tokio::time::timeout(Duration::from_secs(1000), h.servers.recv()).await;
        assert!(next.is_err(), "no second connection is opened");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_session_identifies_again() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = h.accept().await;
        hello(&server, 45_000);
        expect_op(&mut server, 2).await;
        server.close(1000);

        let mut second = h.accept().await;
        assert!(second.url.starts_with("wss://gateway.test/"));
        hello(&second, 45_000);
        expect_op(&mut second, 2).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_failure_is_final() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = h.accept().await;
        hello(&server, 45_000);
        expect_op(&mut server, 2).await;
        server.close(4004);

        match h.event("SHUTDOWN").await {
            Event::Shutdown { code, reason, .. } => {
                assert_eq!(code, Some(4004));
                assert_eq!(reason, "Authentication failed");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.link.status(), ConnectionState::LoginFailed);

        let again = tokio::time::timeout(Duration::from_secs(3600), h.servers.recv()).await;
        assert!(again.is_err(), "no reconnect after a fatal close");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_session_starts_over() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = connect_ready(&mut h).await;
        h.cache
            .build_guild(&json!({"id": "0", "name": "g"}))
            .unwrap();

        server.send_text(r#"{"op":9,"d":false}"#);
        assert_eq!(expect_close(&mut server).await, 1000);

        let mut second = h.accept().await;
        hello(&second, 45_000);
        expect_op(&mut second, 2).await;
        assert_eq!(h.cache.guild_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_request_resumes() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = connect_ready(&mut h).await;

        server.send_text(r#"{"op":7,"d":null}"#);
        assert_eq!(expect_close(&mut server).await, 4000);

        let mut second = h.accept().await;
        hello(&second, 45_000);
        expect_op(&mut second, 6).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_heartbeat_reconnects() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = h.accept().await;
        hello(&server, 1_000);
        expect_op(&mut server, 2).await;

        let beat = expect_op(&mut server, 1).await;
        assert_eq!(beat["d"], Value::Null);
        assert_eq!(expect_close(&mut server).await, 4000);
        assert!(h.accept().await.url.starts_with("wss://gateway.test/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ack_records_latency() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = h.accept().await;
        hello(&server, 1_000);
        expect_op(&mut server, 2).await;
        expect_op(&mut server, 1).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        server.send_text(r#"{"op":11}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.link.latency(), Some(Duration::from_millis(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_heartbeat_request_is_answered() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = connect_ready(&mut h).await;
        server.send_text(r#"{"op":1,"d":null}"#);
        let beat = server.recv_json().await.unwrap();
        assert_eq!(beat["op"], 1);
        assert_eq!(beat["d"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_guild_is_chunked_before_ready() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = h.accept().await;
        hello(&server, 45_000);
        expect_op(&mut server, 2).await;
        ready(&server, &["10"]);
        dispatch(
            &server,
            "GUILD_CREATE",
            2,
            json!({
                "id": "10",
                "name": "big",
                "member_count": 3,
                "members": [{"user": {"id": "100", "username": "a"}}],
            }),
        );

        let request = expect_op(&mut server, 8).await;
        assert_eq!(request["d"]["guild_id"], json!(["10"]));

        dispatch(
            &server,
            "GUILD_MEMBERS_CHUNK",
            3,
            json!({
                "guild_id": "10",
                "members": [
                    {"user": {"id": "101", "username": "b"}},
                    {"user": {"id": "102", "username": "c"}},
                ],
            }),
        );

        let mut names = Vec::new();
        while names.last().map(String::as_str) != Some("READY") {
            let event = h.events.recv().await.unwrap();
            if !matches!(event, Event::StatusChanged { .. }) {
                names.push(event.name().to_string());
            }
        }
        assert_eq!(names, vec!["MEMBERS_CHUNKED", "READY"]);
        assert_eq!(h.cache.member_count(Snowflake::new(10)), 3);
        assert_eq!(
            h.cache.guild(Snowflake::new(10)).map(|g| g.name.clone()).as_deref(),
            Some("big")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_waits_for_handshake() {
        let mut h = harness(ShardInfo::SINGLE);
        h.link
            .update_presence(&PresenceUpdatePayload::new(Status::Idle))
            .unwrap();

        let mut server = h.accept().await;
        hello(&server, 45_000);
        let first = server.recv_json().await.unwrap();
        assert_eq!(first["op"], 2);
        let second = expect_op(&mut server, 3).await;
        assert_eq!(second["d"]["status"], "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_gracefully() {
        let mut h = harness(ShardInfo::SINGLE);
        let mut server = connect_ready(&mut h).await;

        h.link.shutdown();
        assert_eq!(expect_close(&mut server).await, 1000);
        match h.event("SHUTDOWN").await {
            Event::Shutdown { code, .. } => assert_eq!(code, Some(1000)),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.link.status(), ConnectionState::Shutdown);
        h.link.join().await;
    }
}
