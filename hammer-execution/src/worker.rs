//! Virtual client workers

use hammer_config::{Action, Block, BlockType};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::executor::ActionExecutor;

/// Replays the plan's blocks on behalf of one client
pub struct ClientWorker {
    id: u32,
    executor: Arc<ActionExecutor>,
}

impl ClientWorker {
    pub fn new(id: u32, executor: Arc<ActionExecutor>) -> Self {
        Self { id, executor }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run every iteration of the plan; returns the number of iterations
    /// completed, which is lower than planned only if the run was cancelled
    pub async fn run(self) -> u32 {
        let iterations = self.executor.plan().iterations;
        let cancel = self.executor.cancel_token().clone();
        debug!("Client {} starting {} iteration(s)", self.id, iterations);

        let mut completed = 0;
        for _ in 0..iterations {
            if cancel.is_cancelled() {
                break;
            }
            for block in &self.executor.plan().blocks {
                self.run_block(block).await;
            }
            completed += 1;
        }

        debug!("Client {} finished after {} iteration(s)", self.id, completed);
        completed
    }

    async fn run_block(&self, block: &Block) {
        match block.kind {
            // init runs once per run, from the coordinator
            BlockType::Init => {}
            BlockType::Sequential => {
                run_actions_sequentially(&self.executor, self.id, &block.actions).await
            }
            BlockType::Concurrent => {
                run_actions_concurrently(&self.executor, self.id, &block.actions).await
            }
        }
    }
}

/// Execute actions one after another in list order
pub async fn run_actions_sequentially(executor: &ActionExecutor, client: u32, actions: &[Action]) {
    for action in actions {
        if executor.cancel_token().is_cancelled() {
            return;
        }
        executor.execute(client, action).await;
    }
}

/// Execute all actions at once and wait for every one of them
pub async fn run_actions_concurrently(
    executor: &Arc<ActionExecutor>,
    client: u32,
    actions: &[Action],
) {
    let mut tasks = JoinSet::new();
    for action in actions {
        let executor = executor.clone();
        let action = action.clone();
        tasks.spawn(async move { executor.execute(client, &action).await });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Action task for client {} failed: {}", client, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::testing::StubTransport;
    use hammer_config::{ConnectionConfig, Pause, RemoteCall, TestPlan};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn call(operation: &str) -> Action {
        Action::RemoteCall(RemoteCall {
            hostname: "r1".to_string(),
            operation: operation.to_string(),
            source: None,
            target: None,
            filter: None,
            config: None,
            expected: None,
        })
    }

    fn plan(iterations: u32, blocks: Vec<Block>) -> TestPlan {
        TestPlan {
            file: None,
            iterations,
            clients: 1,
            rampup: 0,
            configs: vec![ConnectionConfig {
                hostname: "r1".to_string(),
                port: 830,
                username: "u".to_string(),
                password: "p".to_string(),
                reuseconnection: true,
            }],
            blocks,
        }
    }

    #[tokio::test]
    async fn test_worker_skips_init_and_repeats_iterations() {
        let plan = plan(
            3,
            vec![
                Block {
                    kind: BlockType::Init,
                    actions: vec![call("edit-config")],
                },
                Block {
                    kind: BlockType::Sequential,
                    actions: vec![call("get"), Action::Pause(Pause { duration: 0 })],
                },
                Block {
                    kind: BlockType::Concurrent,
                    actions: vec![call("get-config"), call("get")],
                },
            ],
        );
        let transport = Arc::new(StubTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = Arc::new(ActionExecutor::new(
            Arc::new(plan),
            Arc::new(SessionRegistry::new(transport.clone())),
            tx,
        ));

        let completed = ClientWorker::new(1, executor).run().await;
        assert_eq!(completed, 3);

        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        assert_eq!(records.len(), 9);
        assert!(records.iter().all(|r| r.client == 1 && r.is_success()));
        assert!(records.iter().all(|r| r.operation != "edit-config"));
        assert_eq!(transport.dial_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_actions_overlap() {
        let plan = plan(
            1,
            vec![Block {
                kind: BlockType::Concurrent,
                actions: vec![call("get"), call("get"), call("get")],
            }],
        );
        let transport =
            Arc::new(StubTransport::new().with_call_delay(Duration::from_secs(10)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let executor = Arc::new(ActionExecutor::new(
            Arc::new(plan),
            Arc::new(SessionRegistry::new(transport.clone())),
            tx,
        ));

        let started = tokio::time::Instant::now();
        ClientWorker::new(0, executor).run().await;
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(transport.call_count(), 3);
    }
}
