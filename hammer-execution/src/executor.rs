//! Executes individual plan actions
//!
//! Remote calls always yield exactly one [`OutcomeRecord`] on the result
//! channel; failures are carried in the record's error text and never
//! returned to the worker. Pauses yield nothing.

use hammer_config::{Action, RemoteCall, TestPlan};
use hammer_output::OutcomeRecord;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ExecutionError;
use crate::payload::encode_operation;
use crate::progress::{NoProgress, Progress, ProgressSink};
use crate::registry::SessionRegistry;
use crate::transport::{Credentials, Endpoint, Session};

type CallResult<T> = Result<T, (Progress, ExecutionError)>;

/// Runs actions on behalf of client workers
///
/// One executor is shared by every worker of a run. It holds a sender of
/// the result channel, so the channel closes once the executor and all its
/// clones of the sender are gone.
pub struct ActionExecutor {
    plan: Arc<TestPlan>,
    registry: Arc<SessionRegistry>,
    results: UnboundedSender<OutcomeRecord>,
    progress: Arc<dyn ProgressSink>,
    call_timeout: Option<Duration>,
    run_start: Instant,
    cancel: CancellationToken,
    patterns: Mutex<HashMap<String, Regex>>,
}

impl ActionExecutor {
    pub fn new(
        plan: Arc<TestPlan>,
        registry: Arc<SessionRegistry>,
        results: UnboundedSender<OutcomeRecord>,
    ) -> Self {
        Self {
            plan,
            registry,
            results,
            progress: Arc::new(NoProgress),
            call_timeout: None,
            run_start: Instant::now(),
            cancel: CancellationToken::new(),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Abort calls that take longer than `timeout`
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Reference point for the records' `when` column
    pub fn with_run_start(mut self, run_start: Instant) -> Self {
        self.run_start = run_start;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Execute one action for `client`
    ///
    /// Actions that have not started when the run is cancelled are skipped
    /// and produce no record.
    pub async fn execute(&self, client: u32, action: &Action) {
        if self.cancel.is_cancelled() {
            return;
        }
        match action {
            Action::RemoteCall(call) => {
                let record = self.run_call(client, call).await;
                self.emit(record);
            }
            Action::Pause(pause) => {
                trace!(client, "Sleeping {}s", pause.duration);
                tokio::select! {
                    _ = tokio::time::sleep(pause.as_duration()) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }
    }

    /// Perform a remote call and build its outcome record
    pub async fn run_call(&self, client: u32, call: &RemoteCall) -> OutcomeRecord {
        let mut record = OutcomeRecord::new(client, &call.hostname, &call.operation);
        let result = self.perform(client, call, &mut record).await;
        record.when = millis(self.run_start.elapsed());

        let progress = match result {
            Ok(()) => Progress::Success,
            Err((progress, err)) => {
                debug!(
                    client,
                    hostname = %call.hostname,
                    operation = %call.operation,
                    "Call failed: {}",
                    err
                );
                record.error = err.to_string();
                progress
            }
        };
        self.progress.mark(progress);
        record
    }

    async fn perform(
        &self,
        client: u32,
        call: &RemoteCall,
        record: &mut OutcomeRecord,
    ) -> CallResult<()> {
        let config = self
            .plan
            .config_for(&call.hostname)
            .ok_or_else(|| setup_failed(ExecutionError::UnknownHost(call.hostname.clone())))?;
        let endpoint = Endpoint::from(config);
        let credentials = Credentials::from(config);
        let reuse = config.reuseconnection;

        let session = self
            .cancellable(self.registry.acquire(client, &endpoint, &credentials, reuse))
            .await
            .map_err(setup_failed)?;
        record.session_id = session.id();

        let result = self.call_on(client, call, &endpoint, &session, reuse, record).await;

        if !reuse {
            if let Err(e) = session.close().await {
                debug!("Failed to close session {}: {}", session.id(), e);
            }
        }
        result
    }

    async fn call_on(
        &self,
        client: u32,
        call: &RemoteCall,
        endpoint: &Endpoint,
        session: &Arc<dyn Session>,
        reuse: bool,
        record: &mut OutcomeRecord,
    ) -> CallResult<()> {
        let request = encode_operation(call).map_err(setup_failed)?;

        let started = Instant::now();
        let reply = self.invoke(session.call(&request)).await;
        record.latency = millis(started.elapsed());

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                if reuse && err.invalidates_session() {
                    self.registry.invalidate(client, endpoint, session).await;
                }
                return Err((Progress::CallFailed, err));
            }
        };

        if let Some(pattern) = &call.expected {
            self.check_expected(pattern, &reply.data)?;
        }
        Ok(())
    }

    /// Await a call, bounded by the call timeout and the run's cancellation
    async fn invoke<T, E>(&self, call: impl Future<Output = Result<T, E>>) -> Result<T, ExecutionError>
    where
        ExecutionError: From<E>,
    {
        let bounded = async {
            match self.call_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result.map_err(ExecutionError::from),
                    Err(_) => Err(ExecutionError::Timeout(timeout)),
                },
                None => call.await.map_err(ExecutionError::from),
            }
        };
        self.cancellable(bounded).await
    }

    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, ExecutionError>>,
    ) -> Result<T, ExecutionError> {
        tokio::select! {
            result = fut => result,
            _ = self.cancel.cancelled() => Err(ExecutionError::Cancelled),
        }
    }

    fn check_expected(&self, pattern: &str, actual: &str) -> CallResult<()> {
        let mut patterns = self.patterns.lock();
        if !patterns.contains_key(pattern) {
            let compiled = Regex::new(pattern).map_err(|e| {
                setup_failed(ExecutionError::InvalidPattern {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                    actual: actual.to_string(),
                })
            })?;
            patterns.insert(pattern.to_string(), compiled);
        }

        if patterns[pattern].is_match(actual) {
            Ok(())
        } else {
            Err((
                Progress::CallFailed,
                ExecutionError::Mismatch {
                    expected: pattern.to_string(),
                    actual: actual.to_string(),
                },
            ))
        }
    }

    fn emit(&self, record: OutcomeRecord) {
        if self.results.send(record).is_err() {
            warn!("Result channel closed, dropping outcome record");
        }
    }
}

fn setup_failed(err: ExecutionError) -> (Progress, ExecutionError) {
    (Progress::SetupFailed, err)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::{ScriptedReply, StubTransport};
    use hammer_config::{ConnectionConfig, Pause};
    use tokio::sync::mpsc;

    fn plan(reuse: bool) -> TestPlan {
        TestPlan {
            file: None,
            iterations: 1,
            clients: 1,
            rampup: 0,
            configs: vec![ConnectionConfig {
                hostname: "10.0.0.1".to_string(),
                port: 830,
                username: "admin".to_string(),
                password: "admin".to_string(),
                reuseconnection: reuse,
            }],
            blocks: vec![],
        }
    }

    fn get(hostname: &str) -> RemoteCall {
        RemoteCall {
            hostname: hostname.to_string(),
            operation: "get".to_string(),
            source: None,
            target: None,
            filter: None,
            config: None,
            expected: None,
        }
    }

    fn executor(
        plan: TestPlan,
        transport: Arc<StubTransport>,
    ) -> (ActionExecutor, mpsc::UnboundedReceiver<OutcomeRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(transport));
        (ActionExecutor::new(Arc::new(plan), registry, tx), rx)
    }

    #[tokio::test]
    async fn test_successful_call() {
        let transport = Arc::new(StubTransport::new());
        let (executor, mut rx) = executor(plan(true), transport.clone());

        executor
            .execute(4, &Action::RemoteCall(get("10.0.0.1")))
            .await;

        let record = rx.recv().await.unwrap();
        assert!(record.is_success(), "{}", record.error);
        assert_eq!(record.client, 4);
        assert_eq!(record.hostname, "10.0.0.1");
        assert_eq!(record.operation, "get");
        assert_eq!(record.session_id, transport.sessions()[0].id());
        assert!(record.latency >= 0.0);
        assert_eq!(transport.requests(), vec!["<get></get>".to_string()]);
    }

    #[tokio::test]
    async fn test_pause_produces_no_record() {
        let transport = Arc::new(StubTransport::new());
        let (executor, mut rx) = executor(plan(true), transport);

        executor.execute(0, &Action::Pause(Pause { duration: 0 })).await;
        drop(executor);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_host_is_recorded() {
        let transport = Arc::new(StubTransport::new());
        let (executor, _rx) = executor(plan(true), transport.clone());

        let record = executor.run_call(0, &get("10.9.9.9")).await;
        assert_eq!(record.error, "no connection config for host 10.9.9.9");
        assert_eq!(record.session_id, 0);
        assert_eq!(transport.dial_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_recorded() {
        let transport = Arc::new(StubTransport::new());
        let (executor, _rx) = executor(plan(false), transport.clone());

        let mut call = get("10.0.0.1");
        call.operation = "lock".to_string();
        let record = executor.run_call(0, &call).await;
        assert_eq!(record.error, "lock is not a supported operation");
        // the per-call session is still released
        assert_eq!(transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_expected_pattern() {
        let transport = Arc::new(StubTransport::new().with_reply("<data><state>up</state></data>"));
        let (executor, _rx) = executor(plan(true), transport);

        let mut call = get("10.0.0.1");
        call.expected = Some("<state>(up|testing)</state>".to_string());
        assert!(executor.run_call(0, &call).await.is_success());

        call.expected = Some("down".to_string());
        let record = executor.run_call(0, &call).await;
        assert!(record.error.contains("down"));
        assert!(record.error.contains("<data><state>up</state></data>"));

        call.expected = Some("(unclosed".to_string());
        let record = executor.run_call(0, &call).await;
        assert!(record.error.starts_with("invalid expected pattern (unclosed"));
    }

    #[tokio::test]
    async fn test_fatal_error_invalidates_cached_session() {
        let transport = Arc::new(StubTransport::new().script([
            ScriptedReply::Error(TransportError::Io("broken pipe".into())),
            ScriptedReply::Data("<ok/>".into()),
        ]));
        let (executor, _rx) = executor(plan(true), transport.clone());

        let failed = executor.run_call(0, &get("10.0.0.1")).await;
        assert_eq!(failed.error, "i/o error: broken pipe");
        assert!(transport.sessions()[0].is_closed());

        let retried = executor.run_call(0, &get("10.0.0.1")).await;
        assert!(retried.is_success());
        assert_eq!(transport.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_rpc_error_keeps_cached_session() {
        let transport = Arc::new(StubTransport::new().script([
            ScriptedReply::Error(TransportError::Rpc("access denied".into())),
            ScriptedReply::Data("<ok/>".into()),
        ]));
        let (executor, _rx) = executor(plan(true), transport.clone());

        let failed = executor.run_call(0, &get("10.0.0.1")).await;
        assert_eq!(failed.error, "rpc error: access denied");
        assert!(executor.run_call(0, &get("10.0.0.1")).await.is_success());
        assert_eq!(transport.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout() {
        let transport = Arc::new(StubTransport::new().with_call_delay(Duration::from_secs(120)));
        let (executor, _rx) = executor(plan(true), transport.clone());
        let executor = executor.with_call_timeout(Some(Duration::from_secs(5)));

        let record = executor.run_call(0, &get("10.0.0.1")).await;
        assert_eq!(record.error, "call timed out after 5s");
        assert!(record.latency >= 5000.0);
        // a timed out session is not reused
        assert!(transport.sessions()[0].is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_unstarted_actions() {
        let transport = Arc::new(StubTransport::new());
        let (executor, mut rx) = executor(plan(true), transport.clone());
        executor.cancel_token().cancel();

        executor
            .execute(0, &Action::RemoteCall(get("10.0.0.1")))
            .await;
        drop(executor);
        assert!(rx.recv().await.is_none());
        assert_eq!(transport.dial_count(), 0);
    }
}
