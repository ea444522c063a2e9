//! REST routes
//!
//! A [`Route`] is a method plus a path template such as
//! `/channels/{channel_id}/messages`. Compiling it with parameters yields the
//! concrete path and the rate-limit bucket key: the template with only the
//! route's major parameters substituted.

use reqwest::Method;
use std::fmt;
use std::time::Duration;

use crate::error::RestError;

/// Hard-coded rate limit for routes the server under-reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Uses allowed per window
    pub max_uses: u32,
    /// Window length
    pub reset: Duration,
}

impl RateLimit {
    pub const fn new(max_uses: u32, reset: Duration) -> Self {
        Self { max_uses, reset }
    }
}

/// An endpoint definition
#[derive(Debug, Clone)]
pub struct Route {
    method: Method,
    template: &'static str,
    major_params: &'static [&'static str],
    rate_limit: Option<RateLimit>,
}

impl Route {
    pub const fn new(
        method: Method,
        template: &'static str,
        major_params: &'static [&'static str],
    ) -> Self {
        Self {
            method,
            template,
            major_params,
            rate_limit: None,
        }
    }

    /// Attach an override rate limit
    pub const fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    /// Number of `{param}` placeholders in the template
    pub fn param_count(&self) -> usize {
        placeholders(self.template).count()
    }

    /// Substitute parameters in template order
    pub fn compile(&self, params: &[&str]) -> Result<CompiledRoute, RestError> {
        let expected = self.param_count();
        if params.len() != expected {
            return Err(RestError::InvalidRoute {
                template: self.template,
                expected,
                provided: params.len(),
            });
        }

        let mut path = String::with_capacity(self.template.len() + 32);
        let mut bucket = String::with_capacity(self.template.len() + 32);
        let mut cursor = 0;

        for ((start, end, name), value) in placeholders(self.template).zip(params) {
            let literal = &self.template[cursor..start];
            path.push_str(literal);
            path.push_str(value);

            bucket.push_str(literal);
            if self.major_params.contains(&name) {
                bucket.push_str(value);
            } else {
                bucket.push_str(&self.template[start..end]);
            }
            cursor = end;
        }
        path.push_str(&self.template[cursor..]);
        bucket.push_str(&self.template[cursor..]);

        Ok(CompiledRoute {
            method: self.method.clone(),
            path,
            bucket,
            rate_limit: self.rate_limit,
        })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.template)
    }
}

/// Yields `(start, end, name)` for each `{name}` in the template
fn placeholders(template: &str) -> impl Iterator<Item = (usize, usize, &str)> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let rest = &template[offset..];
        let open = rest.find('{')?;
        let close = rest[open..].find('}')? + open;
        let start = offset + open;
        let end = offset + close + 1;
        offset = end;
        Some((start, end, &template[start + 1..end - 1]))
    })
}

/// A route with every parameter filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRoute {
    method: Method,
    path: String,
    bucket: String,
    rate_limit: Option<RateLimit>,
}

impl CompiledRoute {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the API base url, including any query string
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rate-limit family key
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }

    /// Append query parameters; the bucket key is unaffected
    pub fn query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: fmt::Display,
        V: fmt::Display,
    {
        for (key, value) in params {
            let sep = if self.path.contains('?') { '&' } else { '?' };
            self.path.push(sep);
            self.path.push_str(&format!("{key}={value}"));
        }
        self
    }
}

impl fmt::Display for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

pub const GATEWAY_BOT: Route = Route::new(Method::GET, "/gateway/bot", &[]);

pub const GET_SELF: Route = Route::new(Method::GET, "/users/@me", &[]);
pub const MODIFY_SELF: Route = Route::new(Method::PATCH, "/users/@me", &[]);
pub const GET_SELF_GUILDS: Route = Route::new(Method::GET, "/users/@me/guilds", &[]);
pub const GET_SELF_DMS: Route = Route::new(Method::GET, "/users/@me/channels", &[]);
pub const LEAVE_GUILD: Route = Route::new(
    Method::DELETE,
    "/users/@me/guilds/{guild_id}",
    &["guild_id"],
);
pub const GET_USER: Route = Route::new(Method::GET, "/users/{user_id}", &[]);

pub const GET_GUILD: Route = Route::new(Method::GET, "/guilds/{guild_id}", &["guild_id"]);
pub const MODIFY_GUILD_MEMBER: Route = Route::new(
    Method::PATCH,
    "/guilds/{guild_id}/members/{user_id}",
    &["guild_id"],
);

pub const CREATE_MESSAGE: Route = Route::new(
    Method::POST,
    "/channels/{channel_id}/messages",
    &["channel_id"],
);

/// Reactions are limited to one per quarter second, which the
/// whole-second reset header cannot express
pub const ADD_REACTION: Route = Route::new(
    Method::PUT,
    "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me",
    &["channel_id"],
)
.with_rate_limit(RateLimit::new(1, Duration::from_millis(250)));
