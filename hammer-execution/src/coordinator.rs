//! Run lifecycle
//!
//! A run moves through a fixed sequence of phases:
//!
//! ```text
//! Starting -> Running -> DrainingResults -> ClosingSessions -> Done
//! ```
//!
//! `Running` covers the init block, the staggered client launch and the
//! join of all workers. Results are fully drained and persisted before any
//! cached session is closed, and both steps run even when the run was
//! cancelled or persisting failed.

use chrono::{DateTime, Local};
use hammer_config::TestPlan;
use hammer_output::{OutcomeRecord, ResultSink};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::{CollectedResults, ResultCollector};
use crate::error::ExecutionError;
use crate::executor::ActionExecutor;
use crate::progress::{NoProgress, ProgressSink};
use crate::registry::SessionRegistry;
use crate::worker::{run_actions_sequentially, ClientWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    Running,
    DrainingResults,
    ClosingSessions,
    Done,
}

impl RunPhase {
    pub fn next(self) -> Option<RunPhase> {
        match self {
            RunPhase::Starting => Some(RunPhase::Running),
            RunPhase::Running => Some(RunPhase::DrainingResults),
            RunPhase::DrainingResults => Some(RunPhase::ClosingSessions),
            RunPhase::ClosingSessions => Some(RunPhase::Done),
            RunPhase::Done => None,
        }
    }

    pub fn can_advance_to(self, next: RunPhase) -> bool {
        self.next() == Some(next)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Starting => "starting",
            RunPhase::Running => "running",
            RunPhase::DrainingResults => "draining results",
            RunPhase::ClosingSessions => "closing sessions",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Delay between two consecutive client launches
///
/// Clients are spread evenly over the ramp-up window; a single client starts
/// immediately.
pub fn ramp_spacing(rampup_secs: u64, clients: u32) -> Duration {
    if clients <= 1 {
        return Duration::ZERO;
    }
    Duration::from_secs(rampup_secs) / clients
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub records: Vec<OutcomeRecord>,
    /// Records with a non-empty error
    pub errors: usize,
    pub sessions_closed: usize,
    /// Where the sink stored the results, if anywhere
    pub archive: Option<PathBuf>,
}

/// Drives one run of a test plan
pub struct RunCoordinator {
    plan: Arc<TestPlan>,
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn ResultSink>,
    progress: Arc<dyn ProgressSink>,
    call_timeout: Option<Duration>,
    cancel: CancellationToken,
    phase: watch::Sender<RunPhase>,
}

impl RunCoordinator {
    pub fn new(
        plan: Arc<TestPlan>,
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (phase, _) = watch::channel(RunPhase::Starting);
        Self {
            plan,
            registry,
            sink,
            progress: Arc::new(NoProgress),
            call_timeout: None,
            cancel: CancellationToken::new(),
            phase,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Token that stops the run early; cancel it from outside to abort
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Follow the run's phase
    pub fn phase_rx(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Execute the plan to completion
    ///
    /// Only a failure to persist the results is returned as an error; every
    /// per-call failure is part of the returned records.
    pub async fn run(self) -> Result<RunSummary, ExecutionError> {
        let started_at = Local::now();
        let run_start = Instant::now();
        let plan = self.plan.clone();

        info!(
            "Test plan {} started at {}",
            plan_name(&plan),
            started_at.format("%Y-%m-%d %H:%M:%S")
        );
        info!(
            " > {} client(s), {} iteration(s), rampup of {}s",
            plan.clients, plan.iterations, plan.rampup
        );

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(
            ResultCollector::new(self.sink.clone(), plan.clone(), started_at).run(results_rx),
        );

        let executor = Arc::new(
            ActionExecutor::new(plan.clone(), self.registry.clone(), results_tx)
                .with_progress(self.progress.clone())
                .with_call_timeout(self.call_timeout)
                .with_run_start(run_start)
                .with_cancel_token(self.cancel.clone()),
        );

        self.advance(RunPhase::Running);

        if let Some(init) = plan.init_block() {
            debug!("Running init block with {} action(s)", init.actions.len());
            run_actions_sequentially(&executor, 0, &init.actions).await;
        }

        self.run_clients(&plan, &executor).await;

        // last sender; the collector finishes once it is gone
        drop(executor);

        self.advance(RunPhase::DrainingResults);
        let collected = match collector.await {
            Ok(collected) => collected,
            Err(e) => Err(ExecutionError::WorkerError(format!(
                "result collector failed: {}",
                e
            ))),
        };

        self.advance(RunPhase::ClosingSessions);
        let sessions_closed = self.registry.close_all().await;
        self.progress.finish();
        self.advance(RunPhase::Done);

        let CollectedResults { records, location } = collected?;
        let errors = records.iter().filter(|r| !r.is_success()).count();
        let elapsed = run_start.elapsed();
        info!(
            "Test plan {} completed in {:?}: {} record(s), {} error(s)",
            plan_name(&plan),
            elapsed,
            records.len(),
            errors
        );

        Ok(RunSummary {
            started_at,
            elapsed,
            records,
            errors,
            sessions_closed,
            archive: location,
        })
    }

    /// Launch one worker per client, spaced over the ramp-up window, and
    /// wait for all of them
    async fn run_clients(&self, plan: &TestPlan, executor: &Arc<ActionExecutor>) {
        let spacing = ramp_spacing(plan.rampup, plan.clients);
        let mut workers = JoinSet::new();

        for client in 0..plan.clients {
            if self.cancel.is_cancelled() {
                info!("Run cancelled, {} client(s) not started", plan.clients - client);
                break;
            }
            workers.spawn(ClientWorker::new(client, executor.clone()).run());
            debug!("Started client {}", client);

            if client + 1 < plan.clients && !spacing.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(spacing) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Client worker failed: {}", e);
            }
        }
    }

    fn advance(&self, next: RunPhase) {
        let current = *self.phase.borrow();
        if !current.can_advance_to(next) {
            error!("Invalid run phase transition from {} to {}", current, next);
            debug_assert!(false, "invalid run phase transition {current} -> {next}");
        }
        debug!("Run phase: {}", next);
        self.phase.send_replace(next);
    }
}

fn plan_name(plan: &TestPlan) -> String {
    plan.file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<inline>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        let mut phase = RunPhase::Starting;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(phase.can_advance_to(next));
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                RunPhase::Starting,
                RunPhase::Running,
                RunPhase::DrainingResults,
                RunPhase::ClosingSessions,
                RunPhase::Done
            ]
        );
        assert!(!RunPhase::Running.can_advance_to(RunPhase::ClosingSessions));
        assert!(!RunPhase::Done.can_advance_to(RunPhase::Starting));
    }

    #[test]
    fn test_ramp_spacing() {
        assert_eq!(ramp_spacing(9, 3), Duration::from_secs(3));
        assert_eq!(ramp_spacing(10, 4), Duration::from_millis(2500));
        assert_eq!(ramp_spacing(9, 1), Duration::ZERO);
        assert_eq!(ramp_spacing(0, 8), Duration::ZERO);
    }
}
