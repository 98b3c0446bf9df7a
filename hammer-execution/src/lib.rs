//! nc-hammer execution engine
//!
//! A run fans out one [`ClientWorker`] per virtual client. Workers replay
//! the test plan's blocks through a shared [`ActionExecutor`], which obtains
//! sessions from the [`SessionRegistry`] and pushes exactly one
//! [`OutcomeRecord`](hammer_output::OutcomeRecord) per remote call onto the
//! result channel. A single [`ResultCollector`] drains that channel and
//! hands the result set to a [`ResultSink`](hammer_output::ResultSink).
//! The [`RunCoordinator`] owns the lifecycle: init block, staggered client
//! start, join, drain, then session teardown.

pub mod collector;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod payload;
pub mod progress;
pub mod registry;
pub mod transport;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use collector::{CollectedResults, ResultCollector};
pub use coordinator::{ramp_spacing, RunCoordinator, RunPhase, RunSummary};
pub use error::{ExecutionError, TransportError};
pub use executor::ActionExecutor;
pub use payload::encode_operation;
pub use progress::{ConsoleProgress, NoProgress, Progress, ProgressSink};
pub use registry::SessionRegistry;
pub use transport::{Credentials, Endpoint, RpcReply, Session, Transport};
pub use transport::tcp::TcpTransport;
pub use worker::{run_actions_concurrently, run_actions_sequentially, ClientWorker};
