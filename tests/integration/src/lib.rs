//! Integration test utilities for shardline
//!
//! An in-process mock of the gateway and REST API, plus payload fixtures,
//! for driving the full client end to end over real sockets.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
