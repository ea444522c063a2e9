//! Domain errors

mod build_error;

pub use build_error::BuildError;
