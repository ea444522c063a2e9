//! Rate-limit accounting
//!
//! One [`Bucket`] per endpoint family plus a [`GlobalCooldown`] every bucket
//! consults before dispatching.

mod bucket;
mod global;

pub use bucket::{Bucket, BucketSnapshot};
pub(crate) use bucket::QueuedRequest;
pub use global::GlobalCooldown;
