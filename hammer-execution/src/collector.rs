//! Single consumer of the result channel

use chrono::{DateTime, Local};
use hammer_config::TestPlan;
use hammer_output::{OutcomeRecord, ResultSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::error::ExecutionError;

/// Upper bound on the records preallocated before the first one arrives
const PREALLOCATE_LIMIT: usize = 64 * 1024;

/// Everything the collector received, and where it was persisted
#[derive(Debug, Clone)]
pub struct CollectedResults {
    /// Records in arrival order
    pub records: Vec<OutcomeRecord>,
    pub location: Option<PathBuf>,
}

/// Drains outcome records until every sender is gone, then persists them
pub struct ResultCollector {
    sink: Arc<dyn ResultSink>,
    plan: Arc<TestPlan>,
    started_at: DateTime<Local>,
}

impl ResultCollector {
    pub fn new(sink: Arc<dyn ResultSink>, plan: Arc<TestPlan>, started_at: DateTime<Local>) -> Self {
        Self {
            sink,
            plan,
            started_at,
        }
    }

    /// Receive until the channel closes, then persist the full set once
    pub async fn run(
        self,
        mut results: UnboundedReceiver<OutcomeRecord>,
    ) -> Result<CollectedResults, ExecutionError> {
        let mut records = Vec::with_capacity(self.plan.expected_outcomes().min(PREALLOCATE_LIMIT));
        while let Some(record) = results.recv().await {
            records.push(record);
        }
        debug!("Result channel closed after {} record(s)", records.len());

        let location = self
            .sink
            .persist(&records, &self.plan, self.started_at)
            .await?;
        if let Some(location) = &location {
            info!("Results archived to {}", location.display());
        }

        Ok(CollectedResults { records, location })
    }
}
