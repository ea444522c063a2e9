//! Bucketed REST gateway
//!
//! Requests are queued FIFO per rate-limit bucket. Each bucket with work has
//! exactly one worker task; it waits out the bucket's reset and the shared
//! global cooldown, dispatches the head request, and applies the response's
//! accounting before moving on. Workers retire when their queue empties.

use dashmap::DashMap;
use serde_json::Value;
use shardline_common::RestConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::time::Instant;

use crate::api_error::ErrorResponse;
use crate::error::RestError;
use crate::executor::{HttpTransport, RequestExecutor, ReqwestTransport};
use crate::ratelimit::{Bucket, BucketSnapshot, GlobalCooldown, QueuedRequest};
use crate::request::{RestRequest, RestResponse};
use crate::route::{CompiledRoute, GATEWAY_BOT};

/// Fallback when a 429 carries no retry-after
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Tuning for a [`RestGateway`]
#[derive(Debug, Clone)]
pub struct RestGatewayConfig {
    /// Concurrent HTTP exchanges across all buckets
    pub pool_size: usize,
    /// Times a 429'd request is retried before failing
    pub rate_limit_retries: u32,
}

impl Default for RestGatewayConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            rate_limit_retries: 1,
        }
    }
}

impl From<&RestConfig> for RestGatewayConfig {
    fn from(config: &RestConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            rate_limit_retries: config.rate_limit_retries,
        }
    }
}

struct Inner {
    executor: RequestExecutor,
    buckets: DashMap<String, Arc<Bucket>>,
    pending: DashMap<u64, (Arc<Bucket>, Arc<AtomicBool>)>,
    global: Arc<GlobalCooldown>,
    pool: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
    rate_limit_retries: u32,
}

/// Handle to a queued request
#[derive(Debug)]
pub struct PendingRequest {
    id: u64,
    bucket: String,
    response: oneshot::Receiver<Result<RestResponse, RestError>>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Wait for the outcome
    pub async fn wait(self) -> Result<RestResponse, RestError> {
        self.response.await.unwrap_or(Err(RestError::Shutdown))
    }
}

/// Rate-limited REST front shared by every shard of a client
#[derive(Clone)]
pub struct RestGateway {
    inner: Arc<Inner>,
}

impl RestGateway {
    pub fn new(transport: Arc<dyn HttpTransport>, config: RestGatewayConfig) -> Self {
        Self::with_global(transport, config, GlobalCooldown::shared())
    }

    /// Build a gateway that shares its global cooldown with others
    pub fn with_global(
        transport: Arc<dyn HttpTransport>,
        config: RestGatewayConfig,
        global: Arc<GlobalCooldown>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                executor: RequestExecutor::new(transport),
                buckets: DashMap::new(),
                pending: DashMap::new(),
                global,
                pool: Arc::new(Semaphore::new(config.pool_size.max(1))),
                shutdown,
                next_id: AtomicU64::new(1),
                rate_limit_retries: config.rate_limit_retries,
            }),
        }
    }

    /// Production gateway over `reqwest`
    pub fn from_config(config: &RestConfig, token: &str) -> Result<Self, RestError> {
        let transport = ReqwestTransport::new(&config.base_url, token, config.timeout())?;
        Ok(Self::new(Arc::new(transport), config.into()))
    }

    pub fn global(&self) -> &Arc<GlobalCooldown> {
        &self.inner.global
    }

    /// Queue a request behind its bucket
    pub fn enqueue(&self, request: RestRequest) -> Result<PendingRequest, RestError> {
        if self.is_shutdown() {
            return Err(RestError::Shutdown);
        }

        let route = request.route();
        let key = route.bucket().to_string();
        let bucket = self
            .inner
            .buckets
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(bucket = %key, "New rate-limit bucket");
                Arc::new(Bucket::new(key.clone(), route.rate_limit()))
            })
            .clone();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, response) = oneshot::channel();
        self.inner
            .pending
            .insert(id, (Arc::clone(&bucket), request.cancel_flag()));

        let start_worker = bucket.push(QueuedRequest {
            id,
            request,
            responder,
            rate_limit_retries: 0,
        });
        if start_worker {
            tokio::spawn(run_bucket(Arc::clone(&self.inner), Arc::clone(&bucket)));
        }

        Ok(PendingRequest {
            id,
            bucket: key,
            response,
        })
    }

    /// Queue and wait
    pub async fn execute(&self, request: RestRequest) -> Result<RestResponse, RestError> {
        self.enqueue(request)?.wait().await
    }

    /// Execute a route without a body
    pub async fn get(&self, route: CompiledRoute) -> Result<RestResponse, RestError> {
        self.execute(RestRequest::new(route)).await
    }

    /// Resolve `GET /gateway/bot`
    pub async fn gateway_bot(&self) -> Result<GatewayBot, RestError> {
        self.get(GATEWAY_BOT.compile(&[])?).await?.json()
    }

    /// Cancel a request that has not been dispatched yet
    ///
    /// A request already on the wire is flagged so it is not retried, but
    /// its in-progress exchange completes and `false` is returned.
    pub fn cancel(&self, id: u64) -> bool {
        let Some((bucket, flag)) = self.inner.pending.get(&id).map(|e| e.value().clone()) else {
            return false;
        };
        match bucket.take(id) {
            Some(job) => {
                self.inner.pending.remove(&id);
                tracing::debug!(bucket = %bucket.key(), id, "Request cancelled");
                job.respond(Err(RestError::Cancelled));
                true
            }
            None => {
                if bucket.is_in_flight(id) {
                    flag.store(true, Ordering::Release);
                }
                false
            }
        }
    }

    pub fn bucket(&self, key: &str) -> Option<BucketSnapshot> {
        self.inner
            .buckets
            .get(key)
            .map(|b| b.snapshot(Instant::now()))
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.buckets.len()
    }

    /// Reject new requests and fail every queued one
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        let mut failed = 0;
        for bucket in &self.inner.buckets {
            failed += bucket.drain(|| RestError::Shutdown);
        }
        self.inner.pending.clear();
        tracing::info!(failed, "REST gateway shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("buckets", &self.bucket_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// `GET /gateway/bot` response
#[derive(Debug, Clone, serde::Deserialize)]
pub struct GatewayBot {
    pub url: String,
    pub shards: u32,
    #[serde(default)]
    pub session_start_limit: Option<Value>,
}

async fn run_bucket(inner: Arc<Inner>, bucket: Arc<Bucket>) {
    let mut shutdown = inner.shutdown.subscribe();
    tracing::trace!(bucket = %bucket.key(), "Bucket worker started");

    loop {
        // Wait out both the bucket budget and the global cooldown
        loop {
            if *shutdown.borrow() {
                bucket.drain(|| RestError::Shutdown);
                return;
            }
            let now = Instant::now();
            let wait = bucket.wait_time(now).max(inner.global.remaining(now));
            if wait.is_zero() {
                break;
            }
            tracing::debug!(bucket = %bucket.key(), wait_ms = wait.as_millis() as u64, "Rate limited, waiting");
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {}
            }
        }

        let Some(mut job) = bucket.begin(Instant::now()) else {
            tracing::trace!(bucket = %bucket.key(), "Bucket worker retired");
            return;
        };

        let result = {
            let Ok(_permit) = Arc::clone(&inner.pool).acquire_owned().await else {
                bucket.finish();
                job.respond(Err(RestError::Shutdown));
                continue;
            };
            inner.executor.execute(&job.request).await
        };
        let now = Instant::now();

        let outcome = match result {
            Ok(response) if response.is_rate_limited() => {
                let retry_after = response.retry_after().unwrap_or(DEFAULT_RETRY_AFTER);
                let global = response.is_global();
                bucket.rate_limited(now, retry_after);
                if global {
                    inner.global.extend_until(now + retry_after);
                }
                tracing::warn!(
                    bucket = %bucket.key(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    global,
                    "Hit rate limit"
                );

                if job.rate_limit_retries < inner.rate_limit_retries {
                    job.rate_limit_retries += 1;
                    bucket.requeue(job);
                    continue;
                }
                Err(RestError::RateLimited {
                    bucket: bucket.key().to_string(),
                    retry_after,
                    global,
                })
            }
            Ok(response) => {
                bucket.update(now, &response.rate_limit);
                if response.is_success() {
                    Ok(response)
                } else {
                    Err(RestError::Status {
                        status: response.status,
                        error: ErrorResponse::from_body(&response.body),
                        body: response.body.to_string(),
                    })
                }
            }
            Err(e) => Err(e),
        };

        bucket.finish();
        inner.pending.remove(&job.id);
        job.respond(outcome);
    }
}
