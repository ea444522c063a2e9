//! Error taxonomy

mod error_class;

pub use error_class::{Classify, ErrorClass};
