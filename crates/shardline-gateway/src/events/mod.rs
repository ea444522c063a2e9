//! Dispatch frames
//!
//! Raw dispatch frames as they travel through the ready barrier, and the
//! event names the gateway recognizes.

mod event_types;
mod frame;

pub use event_types::DispatchKind;
pub use frame::DispatchFrame;
