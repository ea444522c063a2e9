//! Connection lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one gateway connection
///
/// Variants are declared in lifecycle order; `has_identified` relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Created, no socket opened yet
    Initializing,
    /// Opening the socket
    Connecting,
    /// Socket open, handshake not yet sent
    Identifying,
    /// Identify or resume sent, waiting for the server to accept it
    AwaitingAck,
    /// Session accepted, startup state still loading
    SettingUp,
    /// Fully loaded and forwarding events
    Connected,
    /// Socket closed
    Disconnected,
    /// Waiting for a turn from the session coordinator
    QueuedToReconnect,
    /// Sleeping out the reconnect backoff
    WaitingToReconnect,
    /// Opening a replacement socket
    Reconnecting,
    /// Closing down on request or after a fatal close
    ShuttingDown,
    /// Terminal
    Shutdown,
    /// Terminal: the server rejected the credentials
    LoginFailed,
}

impl ConnectionState {
    /// Whether the server has accepted the session on the current socket
    #[inline]
    pub fn has_identified(self) -> bool {
        matches!(self, Self::SettingUp | Self::Connected)
    }

    /// Whether no further transitions will happen
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown | Self::LoginFailed)
    }

    /// Get the name of this state
    pub const fn name(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Connecting => "CONNECTING",
            Self::Identifying => "IDENTIFYING",
            Self::AwaitingAck => "AWAITING_ACK",
            Self::SettingUp => "SETTING_UP",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::QueuedToReconnect => "QUEUED_TO_RECONNECT",
            Self::WaitingToReconnect => "WAITING_TO_RECONNECT",
            Self::Reconnecting => "RECONNECTING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Shutdown => "SHUTDOWN",
            Self::LoginFailed => "LOGIN_FAILED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
