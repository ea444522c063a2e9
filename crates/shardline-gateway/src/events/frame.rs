//! Raw dispatch frame

use serde_json::Value;
use shardline_core::Snowflake;

use super::DispatchKind;
use crate::protocol::{GatewayMessage, OpCode};

/// One op 0 frame, kept raw until it is released to the entity builder
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFrame {
    pub kind: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

impl DispatchFrame {
    pub fn new(kind: impl Into<String>, sequence: Option<u64>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            sequence,
            data,
        }
    }

    /// Take the dispatch part of a gateway message
    pub fn from_message(message: GatewayMessage) -> Option<Self> {
        if message.op != OpCode::Dispatch {
            return None;
        }
        Some(Self {
            kind: message.t?,
            sequence: message.s,
            data: message.d.unwrap_or(Value::Null),
        })
    }

    pub fn known_kind(&self) -> Option<DispatchKind> {
        DispatchKind::parse(&self.kind)
    }

    /// The guild this frame belongs to, if any
    pub fn guild_scope(&self) -> Option<Snowflake> {
        let field = match self.known_kind() {
            Some(kind) if kind.is_guild_lifecycle() => "id",
            _ => "guild_id",
        };
        self.data.get(field).and_then(Snowflake::from_value)
    }

    /// `unavailable: true` on a guild payload
    pub fn is_unavailable(&self) -> bool {
        self.data.get("unavailable").and_then(Value::as_bool) == Some(true)
    }
}
