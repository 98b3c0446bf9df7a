//! Configuration for nc-hammer
//!
//! Two kinds of configuration live here: the declarative test plan that
//! describes what a load run does, and the runtime settings (timeouts,
//! logging, archive location) that describe how the tool itself behaves.

pub mod error;
pub mod inline;
pub mod loader;
pub mod plan;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use plan::{Action, Block, BlockType, ConnectionConfig, Filter, Pause, RemoteCall, TestPlan};

// Re-export domain configurations
pub use domains::{execution::ExecutionConfig, logging::LoggingConfig, HammerConfig};
