//! Test helpers for integration tests
//!
//! [`MockDiscord`] serves a scripted gateway socket and a small REST API on
//! an ephemeral port. Each accepted gateway socket is handed to the test as
//! a [`MockSocket`] so the test plays the server side frame by frame.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use shardline_common::ClientConfig;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::fixtures::{SELF_USER_ID, TEST_TOKEN};

/// How long a helper waits for the client before failing the test
pub const WAIT: Duration = Duration::from_secs(5);

/// One REST call the mock received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
}

struct MockState {
    addr: SocketAddr,
    shards: u32,
    sockets: mpsc::UnboundedSender<MockSocket>,
    /// 429s left before `/users/@me` succeeds
    self_limited: AtomicU32,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    fn record(&self, path: String, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let request = RecordedRequest {
            path,
            authorization: header("authorization"),
            user_agent: header("user-agent"),
        };
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
    }
}

/// Mock gateway and REST server
pub struct MockDiscord {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    sockets: AsyncMutex<mpsc::UnboundedReceiver<MockSocket>>,
    _handle: JoinHandle<()>,
}

impl MockDiscord {
    /// Start a mock advertising `shards` shards
    pub async fn start(shards: u32) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let (sender, sockets) = mpsc::unbounded_channel();
        let state = Arc::new(MockState {
            addr,
            shards,
            sockets: sender,
            self_limited: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/v10/gateway/bot", get(gateway_bot))
            .route("/api/v10/users/@me", get(get_self))
            .route("/api/v10/users/:user_id", get(get_user))
            .route("/gateway", get(gateway_socket))
            .route("/gateway/", get(gateway_socket))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            sockets: AsyncMutex::new(sockets),
            _handle: handle,
        })
    }

    pub fn rest_url(&self) -> String {
        format!("http://{}/api/v10", self.addr)
    }

    pub fn gateway_url(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }

    /// Client config pointing at this mock, resolving the gateway over REST
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(TEST_TOKEN);
        config.rest.base_url = self.rest_url();
        config.reconnect.base_delay_secs = 1;
        config.reconnect.identify_delay_secs = 1;
        config
    }

    /// Make the next `count` calls to `/users/@me` answer 429
    pub fn rate_limit_self(&self, count: u32) {
        self.state.self_limited.store(count, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Calls made to one path
    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    /// Next gateway socket the client opens
    pub async fn accept(&self) -> Result<MockSocket> {
        self.accept_within(WAIT).await
    }

    pub async fn accept_within(&self, wait: Duration) -> Result<MockSocket> {
        let mut sockets = self.sockets.lock().await;
        match tokio::time::timeout(wait, sockets.recv()).await {
            Ok(Some(socket)) => Ok(socket),
            Ok(None) => bail!("mock server stopped"),
            Err(_) => bail!("no gateway connection within {wait:?}"),
        }
    }
}

async fn gateway_bot(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Json<Value> {
    state.record("/gateway/bot".into(), &headers);
    Json(json!({
        "url": format!("ws://{}/gateway", state.addr),
        "shards": state.shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 14_400_000,
            "max_concurrency": 1
        }
    }))
}

async fn get_self(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.record("/users/@me".into(), &headers);
    let limited = state
        .self_limited
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if limited {
        return too_many_requests(0.5);
    }
    (
        StatusCode::OK,
        [
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "4"),
            ("x-ratelimit-reset-after", "1.0"),
        ],
        Json(json!({"id": SELF_USER_ID, "username": "shardline", "bot": true})),
    )
        .into_response()
}

/// Always rate limited
async fn get_user(
    State(state): State<Arc<MockState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record(format!("/users/{user_id}"), &headers);
    too_many_requests(0.2)
}

fn too_many_requests(retry_after: f64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("retry-after", retry_after.to_string()),
            ("x-ratelimit-global", "false".to_string()),
        ],
        Json(json!({
            "message": "You are being rate limited.",
            "retry_after": retry_after,
            "global": false
        })),
    )
        .into_response()
}

async fn gateway_socket(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _ = state.sockets.send(MockSocket { socket });
    })
}

/// Server side of one gateway connection
pub struct MockSocket {
    socket: WebSocket,
}

impl MockSocket {
    pub async fn send_json(&mut self, value: &Value) -> Result<()> {
        self.socket
            .send(Message::Text(value.to_string()))
            .await
            .context("sending to the client")
    }

    /// Next text frame from the client, parsed
    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .context("waiting for a client frame")?;
            match message {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    bail!("client closed with {:?}", frame.map(|f| f.code))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => bail!("socket error: {e}"),
                None => bail!("client went away"),
            }
        }
    }

    /// Next frame with `op`, acknowledging any heartbeat on the way
    pub async fn recv_op(&mut self, op: u64) -> Result<Value> {
        loop {
            let frame = self.recv_json().await?;
            if frame["op"] == op {
                return Ok(frame);
            }
            if frame["op"] == 1 {
                self.send_json(&crate::fixtures::heartbeat_ack()).await?;
            }
        }
    }

    /// Close code the client sends, skipping text frames
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        loop {
            let message = tokio::time::timeout(WAIT, self.socket.recv())
                .await
                .context("waiting for the client to close")?;
            match message {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| f.code)),
                Some(Ok(_)) => {}
                Some(Err(e)) => bail!("socket error: {e}"),
                None => return Ok(None),
            }
        }
    }

    pub async fn close(mut self, code: u16, reason: &'static str) -> Result<()> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await
            .context("closing the socket")
    }
}

/// Route client logs to the test output once per process
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
