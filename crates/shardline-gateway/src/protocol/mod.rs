//! Gateway protocol definitions
//!
//! Op codes, the message envelope, payloads and close codes of the gateway
//! wire protocol.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseAction, CloseCode};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    Activity, HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    RequestGuildMembersPayload, ResumePayload, Status, VoiceStateUpdatePayload,
};
