//! End-to-end client tests against the mock gateway and REST API
//!
//! Run with: cargo test -p integration-tests --test client_tests

use std::sync::Arc;
use std::time::Duration;

use integration_tests::*;
use shardline_core::{ConnectionState, EntityCache, Event, EventDispatcher, Snowflake};
use shardline_gateway::GatewayClient;
use shardline_rest::route::{GET_SELF, GET_USER};
use shardline_rest::RestError;
use tokio::sync::broadcast;

struct Harness {
    mock: MockDiscord,
    client: GatewayClient,
    cache: Arc<EntityCache>,
    events: broadcast::Receiver<Event>,
}

async fn start(shards: u32) -> Harness {
    init_test_tracing();
    let mock = MockDiscord::start(shards).await.expect("mock server");
    let dispatcher = Arc::new(EventDispatcher::new());
    let events = dispatcher.subscribe();
    let cache = Arc::new(EntityCache::new());
    let client = GatewayClient::builder(mock.client_config())
        .dispatcher(dispatcher)
        .entity_builder(Arc::clone(&cache) as Arc<dyn shardline_core::EntityBuilder>)
        .start()
        .await
        .expect("client start");
    Harness {
        mock,
        client,
        cache,
        events,
    }
}

impl Harness {
    /// Next event with this name, skipping others
    async fn event(&mut self, name: &str) -> Event {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event stream");
                if event.name() == name {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {name} event within {WAIT:?}"))
    }

    /// Names of events up to and including `last`, without status changes
    async fn events_until(&mut self, last: &str) -> Vec<String> {
        let mut names = Vec::new();
        while names.last().map(String::as_str) != Some(last) {
            let event = tokio::time::timeout(WAIT, self.events.recv())
                .await
                .expect("event within timeout")
                .expect("event stream");
            if !matches!(event, Event::StatusChanged { .. }) {
                names.push(event.name().to_string());
            }
        }
        names
    }

    /// Accept the next socket and identify it, returning the identify frame
    async fn identify(&self) -> (MockSocket, serde_json::Value) {
        let mut socket = self.mock.accept().await.expect("gateway connection");
        socket.send_json(&hello(45_000)).await.unwrap();
        let identify = socket.recv_op(2).await.expect("identify");
        (socket, identify)
    }
}

#[tokio::test]
async fn test_gateway_resolved_over_rest() {
    let h = start(1).await;
    assert_eq!(h.client.shard_count(), 1);

    let requests = h.mock.requests();
    let bot = requests
        .iter()
        .find(|r| r.path == "/gateway/bot")
        .expect("gateway/bot was called");
    assert_eq!(bot.authorization.as_deref(), Some("Bot integration-token"));
    assert!(bot
        .user_agent
        .as_deref()
        .is_some_and(|ua| ua.starts_with("DiscordBot")));

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_ready_then_dispatch_end_to_end() {
    let mut h = start(1).await;
    let (mut socket, identify) = h.identify().await;

    assert_eq!(identify["d"]["token"], TEST_TOKEN);
    assert_eq!(identify["d"]["large_threshold"], 250);
    assert!(identify["d"].get("shard").is_none());

    let url = h.mock.gateway_url();
    socket.send_json(&ready(&url, &["10", "11"])).await.unwrap();
    socket
        .send_json(&guild_create(2, "10", 1, vec![member("100")]))
        .await
        .unwrap();
    // Held until every startup guild is in
    socket.send_json(&message_create(3, "early")).await.unwrap();
    socket
        .send_json(&guild_create(4, "11", 1, vec![member("101")]))
        .await
        .unwrap();

    // Guilds from the startup payload are cached without join events
    let names = h.events_until("MESSAGE_CREATE").await;
    assert_eq!(names, vec!["READY", "MESSAGE_CREATE"]);
    assert_eq!(h.client.status(0), Some(ConnectionState::Connected));
    assert_eq!(h.cache.guild_count(), 2);
    assert_eq!(h.cache.self_user().map(|u| u.username.clone()).as_deref(), Some("shardline"));

    socket.send_json(&message_create(5, "live")).await.unwrap();
    match h.event("MESSAGE_CREATE").await {
        Event::Dispatch { sequence, data, .. } => {
            assert_eq!(sequence, Some(5));
            assert_eq!(data["content"], "live");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    socket
        .send_json(&guild_create(6, "12", 1, vec![member("102")]))
        .await
        .unwrap();
    match h.event("GUILD_JOIN").await {
        Event::GuildJoin { guild, .. } => assert_eq!(guild.id, Snowflake::new(12)),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(h.cache.guild_count(), 3);

    h.client.shutdown().await;
    assert_eq!(socket.recv_close().await.unwrap(), Some(1000));
}

#[tokio::test]
async fn test_large_guild_chunked_before_ready() {
    let mut h = start(1).await;
    let (mut socket, _) = h.identify().await;

    let url = h.mock.gateway_url();
    socket.send_json(&ready(&url, &["20"])).await.unwrap();
    socket
        .send_json(&guild_create(2, "20", 3, vec![member("200")]))
        .await
        .unwrap();

    let request = socket.recv_op(8).await.unwrap();
    assert_eq!(request["d"]["guild_id"], serde_json::json!(["20"]));
    assert_eq!(request["d"]["limit"], 0);

    socket
        .send_json(&members_chunk(3, "20", vec![member("201"), member("202")]))
        .await
        .unwrap();

    let names = h.events_until("READY").await;
    assert_eq!(names, vec!["MEMBERS_CHUNKED", "READY"]);
    assert_eq!(h.cache.member_count(Snowflake::new(20)), 3);

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_server_close_resumes_session() {
    let mut h = start(1).await;
    let (mut socket, _) = h.identify().await;
    let url = h.mock.gateway_url();
    socket.send_json(&ready(&url, &[])).await.unwrap();
    h.event("READY").await;
    socket.send_json(&message_create(2, "before")).await.unwrap();
    h.event("MESSAGE_CREATE").await;

    socket.close(4000, "try again").await.unwrap();
    match h.event("DISCONNECTED").await {
        Event::Disconnected { code, .. } => assert_eq!(code, Some(4000)),
        other => panic!("unexpected event: {other:?}"),
    }

    let mut resumed = h.mock.accept().await.unwrap();
    resumed.send_json(&hello(45_000)).await.unwrap();
    let resume = resumed.recv_op(6).await.unwrap();
    assert_eq!(resume["d"]["token"], TEST_TOKEN);
    assert_eq!(resume["d"]["session_id"], SESSION_ID);
    assert_eq!(resume["d"]["seq"], 2);

    resumed.send_json(&message_create(3, "missed")).await.unwrap();
    resumed
        .send_json(&dispatch("RESUMED", 4, serde_json::json!({})))
        .await
        .unwrap();

    let names = h.events_until("MESSAGE_CREATE").await;
    assert_eq!(names, vec!["RESUMED", "MESSAGE_CREATE"]);
    assert_eq!(h.client.status(0), Some(ConnectionState::Connected));

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_authentication_failure_stops_the_shard() {
    let mut h = start(1).await;
    let (socket, _) = h.identify().await;
    socket.close(4004, "Authentication failed.").await.unwrap();

    match h.event("SHUTDOWN").await {
        Event::Shutdown { code, reason, .. } => {
            assert_eq!(code, Some(4004));
            assert_eq!(reason, "Authentication failed");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(h.client.status(0), Some(ConnectionState::LoginFailed));
    assert!(h
        .mock
        .accept_within(Duration::from_millis(1500))
        .await
        .is_err());

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_shards_identify_one_at_a_time() {
    let mut h = start(2).await;
    assert_eq!(h.client.shard_count(), 2);

    let (mut first, identify) = h.identify().await;
    assert_eq!(identify["d"]["shard"], serde_json::json!([0, 2]));

    // The second shard waits for the first to finish its handshake
    assert!(h
        .mock
        .accept_within(Duration::from_millis(300))
        .await
        .is_err());

    let url = h.mock.gateway_url();
    first.send_json(&ready(&url, &[])).await.unwrap();
    h.event("READY").await;

    let started = tokio::time::Instant::now();
    let (_second, identify) = h.identify().await;
    assert_eq!(identify["d"]["shard"], serde_json::json!([1, 2]));
    assert!(started.elapsed() >= Duration::from_millis(900));

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_rest_retries_a_rate_limit_once() {
    let h = start(1).await;
    h.mock.rate_limit_self(1);

    let started = tokio::time::Instant::now();
    let response = h
        .client
        .rest()
        .get(GET_SELF.compile(&[]).unwrap())
        .await
        .expect("second attempt succeeds");
    assert_eq!(response.status, 200);
    assert_eq!(h.mock.hits("/users/@me"), 2);
    assert!(started.elapsed() >= Duration::from_millis(450));

    let bucket = h
        .client
        .rest()
        .bucket(GET_SELF.compile(&[]).unwrap().bucket())
        .expect("bucket tracked");
    assert_eq!(bucket.remaining, 4);

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_rest_gives_up_after_repeated_rate_limits() {
    let h = start(1).await;

    let result = h
        .client
        .rest()
        .get(GET_USER.compile(&["77"]).unwrap())
        .await;
    match result {
        Err(RestError::RateLimited { global, .. }) => assert!(!global),
        other => panic!("expected a rate limit error, got {other:?}"),
    }
    assert_eq!(h.mock.hits("/users/77"), 2);

    h.client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_rest_requests() {
    let h = start(1).await;
    h.client.shutdown().await;

    let result = h.client.rest().get(GET_SELF.compile(&[]).unwrap()).await;
    assert!(matches!(result, Err(RestError::Shutdown)));
}
