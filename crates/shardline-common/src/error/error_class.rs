//! Error taxonomy shared by the REST and gateway layers
//!
//! Every error maps onto one class; only `Fatal` ends a connection for good.

use serde::Serialize;
use std::fmt;

/// How an error is recovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts and abrupt disconnects: retried through reconnect or resume
    Transient,
    /// Invalid session or stale sequence: recovered by identifying again
    Session,
    /// 429s and global throttles: recovered by waiting
    RateLimit,
    /// Bad token or shard configuration: surfaced as a terminal shutdown
    Fatal,
    /// Unexpected payload shape: logged and the frame skipped
    Payload,
}

impl ErrorClass {
    /// Whether the error ends the connection permanently
    #[inline]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Whether the error is absorbed internally
    #[inline]
    pub const fn is_recoverable(self) -> bool {
        !self.is_fatal()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Session => "session",
            Self::RateLimit => "rate_limit",
            Self::Fatal => "fatal",
            Self::Payload => "payload",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that know their recovery class
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_is_not_recoverable() {
        for class in [
            ErrorClass::Transient,
            ErrorClass::Session,
            ErrorClass::RateLimit,
            ErrorClass::Payload,
        ] {
            assert!(class.is_recoverable(), "{class} should be recoverable");
        }
        assert!(ErrorClass::Fatal.is_fatal());
    }

    #[test]
    fn test_class_display() {
        assert_eq!(ErrorClass::RateLimit.to_string(), "rate_limit");
        assert_eq!(
            serde_json::to_string(&ErrorClass::Transient).unwrap(),
            "\"transient\""
        );
    }
}
