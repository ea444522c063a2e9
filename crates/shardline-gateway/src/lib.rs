//! # shardline-gateway
//!
//! Gateway side of the client: the wire protocol, one link task per shard
//! with its ready barrier, member chunking, outbound pacing and heartbeat,
//! the identify coordinator shared by all shards, and the multi-shard
//! [`GatewayClient`] front.

pub mod backoff;
pub mod barrier;
pub mod chunking;
pub mod client;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod pacer;
pub mod protocol;
pub mod router;
pub mod transport;

pub use backoff::ReconnectBackoff;
pub use barrier::{BarrierMode, ReadyBarrier, ReplayBuffer};
pub use chunking::MemberChunkAggregator;
pub use client::{GatewayClient, GatewayClientBuilder};
pub use connection::{GatewayLink, LinkDeps, LinkManager, LinkSettings, Session};
pub use coordinator::{IdentifyPermit, SessionCoordinator, IDENTIFY_DELAY};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchFrame, DispatchKind};
pub use heartbeat::Heartbeat;
pub use pacer::{Lane, OutboundPacer};
pub use protocol::{CloseCode, GatewayMessage, OpCode, PresenceUpdatePayload, Status};
pub use router::{DispatchRouter, Routed};
pub use transport::{GatewayTransport, TungsteniteTransport};
