//! Traits implemented outside the connection core

mod entity_builder;

pub use entity_builder::EntityBuilder;
