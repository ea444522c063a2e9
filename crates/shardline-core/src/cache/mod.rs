//! Default entity builder backed by concurrent maps

mod entity_cache;

pub use entity_cache::EntityCache;
