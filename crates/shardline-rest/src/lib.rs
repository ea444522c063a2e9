//! # shardline-rest
//!
//! REST side of the client: route definitions, per-bucket rate limiting
//! with a shared global cooldown, and retrying request execution.

pub mod api_error;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod ratelimit;
pub mod request;
pub mod route;

pub use api_error::{ErrorCode, ErrorResponse};
pub use error::{RestError, RestResult};
pub use executor::{HttpTransport, RequestExecutor, ReqwestTransport, TransportError};
pub use gateway::{GatewayBot, PendingRequest, RestGateway, RestGatewayConfig};
pub use ratelimit::{Bucket, BucketSnapshot, GlobalCooldown};
pub use request::{RateLimitHeaders, ResponseBody, RestRequest, RestResponse};
pub use route::{CompiledRoute, RateLimit, Route};
