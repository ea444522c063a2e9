//! WebSocket close codes
//!
//! Maps the numeric close code of a disconnect onto whether the link may
//! reconnect. Unknown codes, and closes without any code, are treated as
//! transient.

use serde::{Deserialize, Serialize};

/// Known close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure
    Graceful = 1000,
    /// Endpoint going away
    GoingAway = 1001,
    /// Connection dropped without a close frame
    Abnormal = 1006,
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload sent
    DecodeError = 4002,
    /// Sent a payload before identifying
    NotAuthenticated = 4003,
    /// Invalid token
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Invalid sequence on resume
    InvalidSequence = 4007,
    /// Sending too fast
    RateLimited = 4008,
    /// Session timed out
    SessionTimeout = 4009,
    /// Invalid shard in identify
    InvalidShard = 4010,
    /// Too many guilds for one connection
    ShardingRequired = 4011,
    /// Invalid gateway version
    InvalidApiVersion = 4012,
    /// Invalid intents
    InvalidIntents = 4013,
    /// Privileged intents not enabled
    DisallowedIntents = 4014,
}

/// What a close means for the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseAction {
    /// Resume when a session is known, otherwise identify afresh
    Reconnect,
    /// Never reconnect
    Fatal,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Graceful),
            1001 => Some(Self::GoingAway),
            1006 => Some(Self::Abnormal),
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed
                | Self::InvalidShard
                | Self::ShardingRequired
                | Self::InvalidApiVersion
                | Self::InvalidIntents
                | Self::DisallowedIntents
        )
    }

    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        !self.is_fatal()
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Graceful => "Graceful close",
            Self::GoingAway => "Going away",
            Self::Abnormal => "Connection lost",
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload sent",
            Self::NotAuthenticated => "Not authenticated",
            Self::AuthenticationFailed => "Authentication failed",
            Self::AlreadyAuthenticated => "Already authenticated",
            Self::InvalidSequence => "Invalid sequence number",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Disallowed intents",
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Graceful => "Graceful",
            Self::GoingAway => "GoingAway",
            Self::Abnormal => "Abnormal",
            Self::UnknownError => "UnknownError",
            Self::UnknownOpcode => "UnknownOpcode",
            Self::DecodeError => "DecodeError",
            Self::NotAuthenticated => "NotAuthenticated",
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::AlreadyAuthenticated => "AlreadyAuthenticated",
            Self::InvalidSequence => "InvalidSequence",
            Self::RateLimited => "RateLimited",
            Self::SessionTimeout => "SessionTimeout",
            Self::InvalidShard => "InvalidShard",
            Self::ShardingRequired => "ShardingRequired",
            Self::InvalidApiVersion => "InvalidApiVersion",
            Self::InvalidIntents => "InvalidIntents",
            Self::DisallowedIntents => "DisallowedIntents",
        }
    }

    /// Classify a raw close, `None` meaning no close frame at all
    #[must_use]
    pub fn classify(code: Option<u16>) -> CloseAction {
        match code.and_then(Self::from_u16) {
            Some(code) if code.is_fatal() => CloseAction::Fatal,
            _ => CloseAction::Reconnect,
        }
    }

    /// Human-readable reason for a raw close code
    #[must_use]
    pub fn describe(code: Option<u16>) -> &'static str {
        match code {
            None => "Connection lost",
            Some(raw) => Self::from_u16(raw).map_or("Unknown close code", Self::description),
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name(), self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), Some(CloseCode::Graceful));
        assert_eq!(CloseCode::from_u16(4004), Some(CloseCode::AuthenticationFailed));
        assert_eq!(CloseCode::from_u16(4014), Some(CloseCode::DisallowedIntents));
        assert_eq!(CloseCode::from_u16(4006), None);
    }

    #[test]
    fn test_fatal_codes_never_reconnect() {
        for raw in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert_eq!(CloseCode::classify(Some(raw)), CloseAction::Fatal, "{raw}");
        }
    }

    #[test]
    fn test_reconnect_eligible_codes() {
        for raw in [1000, 1001, 1006, 4000, 4001, 4002, 4003, 4005, 4007, 4008, 4009] {
            assert_eq!(CloseCode::classify(Some(raw)), CloseAction::Reconnect, "{raw}");
        }
    }

    #[test]
    fn test_unknown_and_missing_codes_reconnect() {
        assert_eq!(CloseCode::classify(Some(4999)), CloseAction::Reconnect);
        assert_eq!(CloseCode::classify(Some(1011)), CloseAction::Reconnect);
        assert_eq!(CloseCode::classify(None), CloseAction::Reconnect);
    }

    #[test]
    fn test_describe() {
        assert_eq!(CloseCode::describe(Some(4004)), "Authentication failed");
        assert_eq!(CloseCode::describe(Some(4999)), "Unknown close code");
        assert_eq!(CloseCode::describe(None), "Connection lost");
    }

    #[test]
    fn test_close_code_display() {
        let display = CloseCode::ShardingRequired.to_string();
        assert!(display.contains("4011"));
        assert!(display.contains("Sharding"));
    }
}
