//! # shardline-common
//!
//! Shared utilities: configuration, the error taxonomy, and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ClientConfig, ConfigError, Environment, GatewayConfig, ReconnectConfig,
    RestConfig, ShardConfig,
};
pub use error::{Classify, ErrorClass};
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
