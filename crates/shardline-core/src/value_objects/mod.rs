//! Value objects - immutable types that represent domain concepts

mod shard;
mod snowflake;

pub use shard::ShardInfo;
pub use snowflake::{Snowflake, SnowflakeParseError};
