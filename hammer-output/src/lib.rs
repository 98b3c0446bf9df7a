//! Outcome records and their persistence
//!
//! Every remote call made during a run yields one [`OutcomeRecord`]. At the
//! end of the run the collected records are handed to a [`ResultSink`];
//! the default sink, [`ResultArchive`], writes them to a timestamped
//! directory together with the resolved test plan.

pub mod archive;
pub mod errors;
pub mod record;
pub mod sink;

pub use archive::{ResultArchive, PLAN_FILE, RESULTS_FILE};
pub use errors::{OutputError, OutputResult};
pub use record::OutcomeRecord;
pub use sink::{MemorySink, ResultSink};
