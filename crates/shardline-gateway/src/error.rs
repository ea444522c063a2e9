//! Gateway error types

use shardline_common::{Classify, ErrorClass};
use shardline_core::BuildError;
use shardline_rest::RestError;
use thiserror::Error;

use crate::protocol::{CloseAction, CloseCode};

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The socket could not be opened
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The open socket failed
    #[error("Socket error: {0}")]
    Socket(String),

    /// A frame could not be encoded or decoded
    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The gateway closed the connection
    #[error("Closed by gateway ({}): {reason}", code.map_or_else(|| "no code".to_string(), |c| c.to_string()))]
    Closed { code: Option<u16>, reason: String },

    /// The session was rejected and must be re-identified
    #[error("Session invalidated")]
    InvalidSession,

    /// No more identify turns are handed out
    #[error("Session coordinator stopped")]
    CoordinatorStopped,

    /// The link was shut down
    #[error("Link shut down")]
    Shutdown,

    /// Resolving gateway details over REST failed
    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    /// The entity builder rejected a payload
    #[error("Entity build failed: {0}")]
    Build(#[from] BuildError),
}

impl GatewayError {
    /// Close code to send when this error ends a socket
    pub fn to_close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Payload(_) => Some(CloseCode::DecodeError),
            Self::Socket(_) | Self::InvalidSession => Some(CloseCode::UnknownError),
            Self::Shutdown | Self::CoordinatorStopped => Some(CloseCode::Graceful),
            Self::Closed { .. } | Self::Connect(_) | Self::Rest(_) | Self::Build(_) => None,
        }
    }
}

impl Classify for GatewayError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Connect(_) | Self::Socket(_) => ErrorClass::Transient,
            Self::Payload(_) | Self::Build(_) => ErrorClass::Payload,
            Self::Closed { code, .. } => match CloseCode::classify(*code) {
                CloseAction::Fatal => ErrorClass::Fatal,
                CloseAction::Reconnect => ErrorClass::Transient,
            },
            Self::InvalidSession => ErrorClass::Session,
            Self::CoordinatorStopped | Self::Shutdown => ErrorClass::Fatal,
            Self::Rest(e) => e.class(),
        }
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
