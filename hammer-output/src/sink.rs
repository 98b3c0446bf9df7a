//! Destinations for the collected result set

use async_trait::async_trait;
use chrono::{DateTime, Local};
use hammer_config::TestPlan;
use parking_lot::Mutex;
use std::path::PathBuf;

use crate::errors::OutputResult;
use crate::record::OutcomeRecord;

/// Persists the result set of a run once all records have been collected
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Store the records; returns where they were written, if anywhere
    async fn persist(
        &self,
        records: &[OutcomeRecord],
        plan: &TestPlan,
        started_at: DateTime<Local>,
    ) -> OutputResult<Option<PathBuf>>;
}

/// Keeps the persisted records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Option<Vec<OutcomeRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records from the last `persist`, `None` if nothing was persisted yet
    pub fn records(&self) -> Option<Vec<OutcomeRecord>> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(
        &self,
        records: &[OutcomeRecord],
        _plan: &TestPlan,
        _started_at: DateTime<Local>,
    ) -> OutputResult<Option<PathBuf>> {
        *self.records.lock() = Some(records.to_vec());
        Ok(None)
    }
}
