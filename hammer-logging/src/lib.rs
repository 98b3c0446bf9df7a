//! Structured logging setup for nc-hammer
//!
//! All crates log through `tracing`; this crate owns the subscriber that
//! turns those events into console output.

pub mod init;

pub use hammer_config::domains::logging::{LogFormat, LogLevel, LoggingConfig};
pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
