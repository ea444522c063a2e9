//! Entity builder errors

use thiserror::Error;

/// Errors raised while turning raw payloads into domain objects
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Missing field `{field}` in {kind} payload")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl BuildError {
    /// Build a missing-field error
    pub const fn missing(kind: &'static str, field: &'static str) -> Self {
        Self::MissingField { kind, field }
    }

    /// Payload kind the error refers to
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { kind, .. } | Self::InvalidPayload { kind, .. } => kind,
        }
    }
}
