//! Per-endpoint-family rate budget and request queue
//!
//! All state sits behind one lock: the bucket's worker and the response
//! handling that follows its dispatch are the only writers.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RestError;
use crate::request::{RateLimitHeaders, RestRequest, RestResponse};
use crate::route::RateLimit;

pub(crate) type Responder = oneshot::Sender<Result<RestResponse, RestError>>;

/// A request waiting in a bucket
#[derive(Debug)]
pub(crate) struct QueuedRequest {
    pub id: u64,
    pub request: RestRequest,
    pub responder: Responder,
    pub rate_limit_retries: u32,
}

impl QueuedRequest {
    pub fn respond(self, result: Result<RestResponse, RestError>) {
        // The caller may have dropped its handle
        let _ = self.responder.send(result);
    }
}

#[derive(Debug)]
struct BucketState {
    limit: u32,
    remaining: u32,
    reset: Option<Instant>,
    queue: VecDeque<QueuedRequest>,
    in_flight: Option<u64>,
    worker_active: bool,
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub key: String,
    pub limit: u32,
    pub remaining: u32,
    pub queued: usize,
    pub reset_in: Option<Duration>,
}

/// Rate budget for one endpoint family
#[derive(Debug)]
pub struct Bucket {
    key: String,
    rate_limit: Option<RateLimit>,
    state: Mutex<BucketState>,
}

impl Bucket {
    pub fn new(key: impl Into<String>, rate_limit: Option<RateLimit>) -> Self {
        // Unknown buckets allow one request to learn the real limits
        let limit = rate_limit.map_or(1, |r| r.max_uses.max(1));
        Self {
            key: key.into(),
            rate_limit,
            state: Mutex::new(BucketState {
                limit,
                remaining: limit,
                reset: None,
                queue: VecDeque::new(),
                in_flight: None,
                worker_active: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    pub fn snapshot(&self, now: Instant) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            key: self.key.clone(),
            limit: state.limit,
            remaining: state.remaining,
            queued: state.queue.len(),
            reset_in: state.reset.map(|r| r.saturating_duration_since(now)),
        }
    }

    /// Queue a request; returns true when the caller must start a worker
    pub(crate) fn push(&self, job: QueuedRequest) -> bool {
        let mut state = self.state.lock();
        state.queue.push_back(job);
        if state.worker_active {
            false
        } else {
            state.worker_active = true;
            true
        }
    }

    /// How long the head of the queue must wait for this bucket's budget
    pub(crate) fn wait_time(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        match state.reset {
            Some(reset) if state.remaining == 0 && reset > now => reset - now,
            _ => Duration::ZERO,
        }
    }

    /// Pop the head for dispatch
    ///
    /// Returns `None` and retires the worker when the queue is empty; the
    /// check and the retirement share the lock so a concurrent `push`
    /// cannot be stranded.
    pub(crate) fn begin(&self, now: Instant) -> Option<QueuedRequest> {
        let mut state = self.state.lock();
        if state.remaining == 0 && state.reset.map_or(true, |r| r <= now) {
            state.remaining = state.limit;
            state.reset = None;
        }
        match state.queue.pop_front() {
            Some(job) => {
                state.in_flight = Some(job.id);
                Some(job)
            }
            None => {
                state.worker_active = false;
                None
            }
        }
    }

    /// Put a rate-limited request back at the head
    pub(crate) fn requeue(&self, job: QueuedRequest) {
        let mut state = self.state.lock();
        state.in_flight = None;
        state.queue.push_front(job);
    }

    pub(crate) fn finish(&self) {
        self.state.lock().in_flight = None;
    }

    /// Server said 429: nothing left until `retry_after` has passed
    pub(crate) fn rate_limited(&self, now: Instant, retry_after: Duration) {
        let mut state = self.state.lock();
        state.remaining = 0;
        let until = now + retry_after;
        state.reset = Some(state.reset.map_or(until, |r| r.max(until)));
    }

    /// Apply accounting after a non-429 response
    pub(crate) fn update(&self, now: Instant, headers: &RateLimitHeaders) {
        let mut state = self.state.lock();
        if let Some(rate_limit) = self.rate_limit {
            // Header values are rounded to whole seconds; trust the override
            if state.reset.map_or(true, |r| r <= now) {
                state.reset = Some(now + rate_limit.reset);
                state.remaining = state.limit;
            }
            state.remaining = state.remaining.saturating_sub(1);
            return;
        }

        if let Some(limit) = headers.limit {
            state.limit = limit;
        }
        if let Some(remaining) = headers.remaining {
            state.remaining = remaining;
        }
        if let Some(delay) = headers.reset_delay() {
            state.reset = Some(now + delay);
        }
    }

    /// Remove a queued request; the one being dispatched stays
    pub(crate) fn take(&self, id: u64) -> Option<QueuedRequest> {
        let mut state = self.state.lock();
        if state.in_flight == Some(id) {
            return None;
        }
        let index = state.queue.iter().position(|job| job.id == id)?;
        state.queue.remove(index)
    }

    /// Whether `id` is currently on the wire
    pub(crate) fn is_in_flight(&self, id: u64) -> bool {
        self.state.lock().in_flight == Some(id)
    }

    /// Fail every queued request and retire the worker
    pub(crate) fn drain(&self, reason: impl Fn() -> RestError) -> usize {
        let jobs: Vec<_> = {
            let mut state = self.state.lock();
            state.worker_active = false;
            state.queue.drain(..).collect()
        };
        let count = jobs.len();
        for job in jobs {
            job.respond(Err(reason()));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{ADD_REACTION, GET_SELF};

    fn job(id: u64) -> (QueuedRequest, oneshot::Receiver<Result<RestResponse, RestError>>) {
        let (tx, rx) = oneshot::channel();
        let job = QueuedRequest {
            id,
            request: RestRequest::new(GET_SELF.compile(&[]).unwrap()),
            responder: tx,
            rate_limit_retries: 0,
        };
        (job, rx)
    }

    #[test]
    fn test_first_push_starts_worker() {
        let bucket = Bucket::new("/users/@me", None);
        assert!(bucket.push(job(1).0));
        assert!(!bucket.push(job(2).0));
    }

    #[test]
    fn test_empty_queue_retires_worker() {
        let bucket = Bucket::new("/users/@me", None);
        bucket.push(job(1).0);
        let now = Instant::now();
        assert_eq!(bucket.begin(now).map(|j| j.id), Some(1));
        bucket.finish();
        assert!(bucket.begin(now).is_none());
        // Next push needs a new worker
        assert!(bucket.push(job(2).0));
    }

    #[test]
    fn test_exhausted_bucket_waits_for_reset() {
        let bucket = Bucket::new("k", None);
        let now = Instant::now();
        bucket.update(
            now,
            &RateLimitHeaders {
                remaining: Some(0),
                limit: Some(5),
                reset_after: Some(2.0),
                ..Default::default()
            },
        );
        assert_eq!(bucket.wait_time(now), Duration::from_secs(2));
        assert_eq!(bucket.wait_time(now + Duration::from_secs(3)), Duration::ZERO);

        bucket.push(job(1).0);
        bucket.begin(now + Duration::from_secs(3));
        let snapshot = bucket.snapshot(now + Duration::from_secs(3));
        assert_eq!(snapshot.remaining, 5);
        assert_eq!(snapshot.reset_in, None);
    }

    #[test]
    fn test_rate_limited_zeroes_remaining() {
        let bucket = Bucket::new("k", None);
        let now = Instant::now();
        bucket.rate_limited(now, Duration::from_millis(500));
        assert_eq!(bucket.wait_time(now), Duration::from_millis(500));
        assert_eq!(bucket.snapshot(now).remaining, 0);
    }

    #[test]
    fn test_override_ignores_headers() {
        let route = ADD_REACTION.compile(&["1", "2", "x"]).unwrap();
        let bucket = Bucket::new(route.bucket(), route.rate_limit());
        let now = Instant::now();
        bucket.update(
            now,
            &RateLimitHeaders {
                remaining: Some(10),
                limit: Some(10),
                reset_after: Some(1.0),
                ..Default::default()
            },
        );
        let snapshot = bucket.snapshot(now);
        assert_eq!(snapshot.limit, 1);
        assert_eq!(snapshot.remaining, 0);
        assert_eq!(bucket.wait_time(now), Duration::from_millis(250));
    }

    #[test]
    fn test_take_skips_in_flight() {
        let bucket = Bucket::new("k", None);
        bucket.push(job(1).0);
        bucket.push(job(2).0);
        let head = bucket.begin(Instant::now()).unwrap();
        assert!(bucket.take(head.id).is_none());
        assert!(bucket.is_in_flight(1));
        assert_eq!(bucket.take(2).map(|j| j.id), Some(2));
        assert!(bucket.take(2).is_none());
    }

    #[tokio::test]
    async fn test_drain_fails_queued() {
        let bucket = Bucket::new("k", None);
        let (a, rx_a) = job(1);
        let (b, rx_b) = job(2);
        bucket.push(a);
        bucket.push(b);
        assert_eq!(bucket.drain(|| RestError::Shutdown), 2);
        assert!(matches!(rx_a.await.unwrap(), Err(RestError::Shutdown)));
        assert!(matches!(rx_b.await.unwrap(), Err(RestError::Shutdown)));
    }
}
