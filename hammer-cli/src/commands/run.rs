//! `nc-hammer run`

use anyhow::{Context, Result};
use hammer_config::{ExecutionConfig, TestPlan};
use hammer_execution::{
    ConsoleProgress, NoProgress, ProgressSink, RunCoordinator, SessionRegistry, TcpTransport,
};
use hammer_output::ResultArchive;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run_command(plan_path: &Path, config: &ExecutionConfig) -> Result<()> {
    let plan = TestPlan::load(plan_path)
        .with_context(|| format!("Failed to load test plan {:?}", plan_path))?;

    let transport = Arc::new(TcpTransport::new(config.connect_timeout));
    let registry = Arc::new(SessionRegistry::new(transport));
    let archive = Arc::new(ResultArchive::new(&config.results_dir));
    let progress: Arc<dyn ProgressSink> = if config.progress {
        Arc::new(ConsoleProgress)
    } else {
        Arc::new(NoProgress)
    };

    let coordinator = RunCoordinator::new(Arc::new(plan), registry, archive)
        .with_progress(progress)
        .with_call_timeout(config.call_timeout);

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the run");
            cancel.cancel();
        }
    });

    let summary = coordinator.run().await.context("Test run failed")?;

    match &summary.archive {
        Some(location) => info!(
            "Test completed in {:?}, {} records, {} errors, archived to {}",
            summary.elapsed,
            summary.records.len(),
            summary.errors,
            location.display()
        ),
        None => info!(
            "Test completed in {:?}, {} records, {} errors",
            summary.elapsed,
            summary.records.len(),
            summary.errors
        ),
    }

    Ok(())
}
