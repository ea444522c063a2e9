//! Request and response types
//!
//! Transport-independent: the executor and tests exchange these, and the
//! reqwest transport converts at the edge.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RestError;
use crate::route::CompiledRoute;

/// One outbound REST call
#[derive(Debug, Clone)]
pub struct RestRequest {
    route: CompiledRoute,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    cancelled: Arc<AtomicBool>,
}

impl RestRequest {
    pub fn new(route: CompiledRoute) -> Self {
        Self {
            route,
            body: None,
            headers: Vec::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a JSON body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach an extra header, e.g. `X-Audit-Log-Reason`
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn route(&self) -> &CompiledRoute {
        &self.route
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Stop further attempts; an exchange already on the wire completes
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Rate-limit headers of one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Remaining`
    pub remaining: Option<u32>,
    /// `X-RateLimit-Limit`
    pub limit: Option<u32>,
    /// `X-RateLimit-Reset`, epoch seconds
    pub reset: Option<f64>,
    /// `X-RateLimit-Reset-After`, seconds
    pub reset_after: Option<f64>,
    /// `Retry-After`, seconds
    pub retry_after: Option<f64>,
    /// `X-RateLimit-Global`
    pub global: bool,
    /// `Date`, the server clock
    pub date: Option<DateTime<Utc>>,
}

impl RateLimitHeaders {
    /// Parse from any header source; unparsable values are ignored
    pub fn from_lookup<'a, F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let number = |name: &str| get(name).and_then(|v| v.trim().parse::<f64>().ok());
        Self {
            remaining: get("x-ratelimit-remaining").and_then(|v| v.trim().parse().ok()),
            limit: get("x-ratelimit-limit").and_then(|v| v.trim().parse().ok()),
            reset: number("x-ratelimit-reset"),
            reset_after: number("x-ratelimit-reset-after"),
            retry_after: number("retry-after"),
            global: get("x-ratelimit-global").is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            date: get("date")
                .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }

    pub fn from_header_map(headers: &HeaderMap) -> Self {
        Self::from_lookup(|name| headers.get(name).and_then(|v| v.to_str().ok()))
    }

    /// Time until the bucket resets
    ///
    /// `Reset-After` wins; otherwise `Reset` is measured against the
    /// server's `Date` so local clock skew does not matter.
    pub fn reset_delay(&self) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(secs(after));
        }
        let reset = self.reset?;
        let now = self.date.unwrap_or_else(Utc::now);
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        Some(secs(reset - now_secs))
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// JSON when it parses, text otherwise
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::Empty;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Result of one HTTP exchange
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub rate_limit: RateLimitHeaders,
    pub body: ResponseBody,
}

impl RestResponse {
    pub fn new(status: u16, rate_limit: RateLimitHeaders, body: ResponseBody) -> Self {
        Self {
            status,
            rate_limit,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Retry delay of a 429, from the header or the body
    pub fn retry_after(&self) -> Option<Duration> {
        self.rate_limit
            .retry_after
            .or_else(|| self.body.as_json()?.get("retry_after")?.as_f64())
            .map(secs)
    }

    /// Whether a 429 applies to every bucket
    pub fn is_global(&self) -> bool {
        self.rate_limit.global
            || self
                .body
                .as_json()
                .and_then(|b| b.get("global"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Deserialize a JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        let value = match &self.body {
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Empty => Value::Null,
            ResponseBody::Text(text) => {
                return Err(RestError::Decode(format!("expected JSON, got {text:?}")))
            }
        };
        serde_json::from_value(value).map_err(|e| RestError::Decode(e.to_string()))
    }
}
