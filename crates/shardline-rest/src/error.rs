//! REST error types

use shardline_common::{Classify, ErrorClass};

use crate::api_error::ErrorResponse;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to REST callers
#[derive(Debug, Error)]
pub enum RestError {
    /// Non-success status other than 429 and 5xx
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        /// Typed error body, when the API sent one
        error: Option<ErrorResponse>,
        body: String,
    },

    /// Still rate limited after the configured retries
    #[error("Rate limited on {bucket} (retry after {retry_after:?}, global: {global})")]
    RateLimited {
        bucket: String,
        retry_after: Duration,
        global: bool,
    },

    /// Server errors persisted through every retry
    #[error("Server error {status} after {attempts} attempts")]
    ServerError { status: u16, attempts: u32 },

    /// Timed out twice
    #[error("Request timed out")]
    Timeout,

    /// Cancelled before dispatch
    #[error("Request cancelled")]
    Cancelled,

    /// The gateway was shut down
    #[error("REST gateway shut down")]
    Shutdown,

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Wrong number of route parameters
    #[error("Route {template} takes {expected} parameters, got {provided}")]
    InvalidRoute {
        template: &'static str,
        expected: usize,
        provided: usize,
    },

    /// Response body did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// The HTTP client could not be built
    #[error("Client setup failed: {0}")]
    Setup(String),
}

impl RestError {
    /// The API's error body for a failed request
    pub fn error_response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Status { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::ServerError { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl Classify for RestError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Status { status, .. } if matches!(status, 401 | 403) => ErrorClass::Fatal,
            Self::Status { .. } | Self::Decode(_) | Self::InvalidRoute { .. } => {
                ErrorClass::Payload
            }
            Self::RateLimited { .. } => ErrorClass::RateLimit,
            Self::ServerError { .. } | Self::Timeout | Self::Transport(_) | Self::Cancelled => {
                ErrorClass::Transient
            }
            Self::Shutdown | Self::Setup(_) => ErrorClass::Fatal,
        }
    }
}

/// REST result type
pub type RestResult<T> = Result<T, RestError>;
