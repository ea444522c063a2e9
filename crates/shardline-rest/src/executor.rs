//! Single HTTP exchange with immediate fault handling
//!
//! 5xx responses are retried with a linear backoff and a timeout is retried
//! once. Rate limits are the gateway's business; 429s are returned as-is.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::RestError;
use crate::request::{RateLimitHeaders, ResponseBody, RestRequest, RestResponse};

/// Extra attempts after a 5xx
pub const MAX_SERVER_RETRIES: u32 = 3;
/// Backoff unit between 5xx retries
pub const SERVER_RETRY_STEP: Duration = Duration::from_millis(50);

/// `DiscordBot (<url>, <version>)` as the API requires
pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://crates.io/crates/",
    env!("CARGO_PKG_NAME"),
    ", ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Failure below the HTTP layer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

/// Performs one HTTP exchange
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &RestRequest) -> Result<RestResponse, TransportError>;
}

/// Retrying wrapper around an [`HttpTransport`]
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub async fn execute(&self, request: &RestRequest) -> Result<RestResponse, RestError> {
        let route = request.route();
        let mut server_errors = 0u32;
        let mut timed_out = false;

        loop {
            if request.is_cancelled() {
                return Err(RestError::Cancelled);
            }

            match self.transport.send(request).await {
                Ok(response) if response.is_server_error() => {
                    if server_errors >= MAX_SERVER_RETRIES {
                        tracing::warn!(
                            route = %route,
                            status = response.status,
                            "Giving up after repeated server errors"
                        );
                        return Err(RestError::ServerError {
                            status: response.status,
                            attempts: server_errors + 1,
                        });
                    }
                    server_errors += 1;
                    tracing::debug!(
                        route = %route,
                        status = response.status,
                        attempt = server_errors,
                        "Server error, retrying"
                    );
                    tokio::time::sleep(SERVER_RETRY_STEP * server_errors).await;
                }
                Ok(response) => return Ok(response),
                Err(TransportError::Timeout) => {
                    if timed_out {
                        tracing::warn!(route = %route, "Request timed out twice");
                        return Err(RestError::Timeout);
                    }
                    timed_out = true;
                    tracing::debug!(route = %route, "Request timed out, retrying once");
                }
                Err(TransportError::Other(e)) => return Err(RestError::Transport(e)),
            }
        }
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor").finish_non_exhaustive()
    }
}

/// Production transport over `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(
        base_url: impl Into<String>,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

        let mut auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|e| RestError::Setup(e.to_string()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .gzip(true)
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
        let route = request.route();
        let url = format!("{}{}", self.base_url, route.path());

        let mut builder = self.client.request(route.method().clone(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest)?;
        let status = response.status().as_u16();
        let rate_limit = RateLimitHeaders::from_header_map(response.headers());
        let bytes = response.bytes().await.map_err(map_reqwest)?;

        tracing::trace!(route = %route, status, "REST exchange");
        Ok(RestResponse::new(
            status,
            rate_limit,
            ResponseBody::from_bytes(&bytes),
        ))
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Other(e.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    pub type Scripted = Result<RestResponse, TransportError>;

    /// Replays scripted outcomes and records when each request arrived
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        pub calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedTransport {
        pub fn new(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn paths(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(p, _)| p.clone()).collect()
        }

        pub fn times(&self) -> Vec<Instant> {
            self.calls.lock().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
            self.calls
                .lock()
                .push((request.route().path().to_string(), Instant::now()));
            self.script.lock().pop_front().unwrap_or_else(|| Ok(ok()))
        }
    }

    pub fn ok() -> RestResponse {
        status(200)
    }

    pub fn status(code: u16) -> RestResponse {
        RestResponse::new(code, RateLimitHeaders::default(), ResponseBody::Empty)
    }

    pub fn with_headers(code: u16, headers: RateLimitHeaders) -> RestResponse {
        RestResponse::new(code, headers, ResponseBody::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::route::GET_SELF;
    use tokio::time::Instant;

    fn request() -> RestRequest {
        RestRequest::new(GET_SELF.compile(&[]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retry_with_linear_backoff() {
        let transport = ScriptedTransport::new([Ok(status(502)), Ok(status(503)), Ok(ok())]);
        let executor = RequestExecutor::new(transport.clone());

        let response = executor.execute(&request()).await.unwrap();
        assert_eq!(response.status, 200);

        let times = transport.times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_millis(50));
        assert_eq!(times[2] - times[1], Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_give_up_after_three_retries() {
        let transport = ScriptedTransport::new((0..5).map(|_| Ok(status(500))));
        let executor = RequestExecutor::new(transport.clone());
        let start = Instant::now();

        let err = executor.execute(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            RestError::ServerError {
                status: 500,
                attempts: 4
            }
        ));
        assert_eq!(transport.calls.lock().len(), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(50 + 100 + 150));
    }

    #[tokio::test]
    async fn test_timeout_retried_once() {
        let transport = ScriptedTransport::new([Err(TransportError::Timeout), Ok(ok())]);
        let executor = RequestExecutor::new(transport.clone());
        assert!(executor.execute(&request()).await.is_ok());

        let transport = ScriptedTransport::new([
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Ok(ok()),
        ]);
        let executor = RequestExecutor::new(transport.clone());
        assert!(matches!(
            executor.execute(&request()).await,
            Err(RestError::Timeout)
        ));
        assert_eq!(transport.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_and_client_errors_pass_through() {
        let transport = ScriptedTransport::new([Ok(status(429))]);
        let executor = RequestExecutor::new(transport.clone());
        assert_eq!(executor.execute(&request()).await.unwrap().status, 429);
        assert_eq!(transport.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_request_is_not_sent() {
        let transport = ScriptedTransport::new([]);
        let executor = RequestExecutor::new(transport.clone());
        let request = request();
        request.cancel();
        assert!(matches!(
            executor.execute(&request).await,
            Err(RestError::Cancelled)
        ));
        assert!(transport.calls.lock().is_empty());
    }

    #[test]
    fn test_reqwest_transport_builds() {
        let transport =
            ReqwestTransport::new("https://example.test/api/", "token", Duration::from_secs(5))
                .unwrap();
        assert_eq!(transport.base_url, "https://example.test/api");
    }
}
