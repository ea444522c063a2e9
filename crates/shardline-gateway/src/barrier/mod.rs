//! Ready barrier
//!
//! Holds dispatch frames back until the state they refer to is consistent:
//! connection-wide while a session is starting or resuming, per guild while
//! that guild is still loading.

mod guild_state;
mod ready_barrier;
mod replay_buffer;

pub use guild_state::GuildLoadState;
pub use ready_barrier::{BarrierMode, ReadyBarrier};
pub use replay_buffer::ReplayBuffer;
