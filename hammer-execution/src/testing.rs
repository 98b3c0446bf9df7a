//! In-process transport for exercising the engine without a device
//!
//! [`StubTransport`] counts dials, calls and closes and answers calls either
//! from a script of [`ScriptedReply`] values or with a fixed default reply.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{Credentials, Endpoint, RpcReply, Session, Transport};

/// Answer to one call
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Data(String),
    Error(TransportError),
    /// Answer with the data after waiting
    Delayed(Duration, String),
}

#[derive(Debug, Default)]
struct StubState {
    dials: AtomicU64,
    calls: AtomicU64,
    closes: AtomicU64,
    next_id: AtomicU64,
    requests: Mutex<Vec<String>>,
    dialed: Mutex<Vec<Endpoint>>,
    script: Mutex<VecDeque<ScriptedReply>>,
}

/// Transport double that never touches the network
pub struct StubTransport {
    state: Arc<StubState>,
    sessions: Mutex<Vec<Arc<StubSession>>>,
    default_reply: String,
    dial_delay: Option<Duration>,
    call_delay: Option<Duration>,
    dial_failure: Option<String>,
    fail_closes: bool,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StubState::default()),
            sessions: Mutex::new(Vec::new()),
            default_reply: "<ok/>".to_string(),
            dial_delay: None,
            call_delay: None,
            dial_failure: None,
            fail_closes: false,
        }
    }

    /// Data returned by calls once the script is exhausted
    pub fn with_reply(mut self, data: impl Into<String>) -> Self {
        self.default_reply = data.into();
        self
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    /// Delay applied to every call before it is answered
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    /// Replies consumed in order by successive calls across all sessions
    pub fn script(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        self.state.script.lock().extend(replies);
        self
    }

    pub fn fail_dials(mut self, message: impl Into<String>) -> Self {
        self.dial_failure = Some(message.into());
        self
    }

    /// Make `close` report an error; the session is still marked closed
    pub fn fail_closes(mut self) -> Self {
        self.fail_closes = true;
        self
    }

    pub fn dial_count(&self) -> u64 {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Request bodies in the order calls were received
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    /// Endpoints in the order they were dialed
    pub fn dialed(&self) -> Vec<Endpoint> {
        self.state.dialed.lock().clone()
    }

    /// Sessions established so far, in dial order
    pub fn sessions(&self) -> Vec<Arc<StubSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn Session>, TransportError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        self.state.dialed.lock().push(endpoint.clone());

        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.dial_failure {
            return Err(TransportError::Dial {
                endpoint: endpoint.to_string(),
                message: message.clone(),
            });
        }

        let session = Arc::new(StubSession {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            state: self.state.clone(),
            default_reply: self.default_reply.clone(),
            call_delay: self.call_delay,
            fail_close: self.fail_closes,
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        self.sessions.lock().push(session.clone());
        Ok(session as Arc<dyn Session>)
    }
}

/// Session handed out by [`StubTransport`]
pub struct StubSession {
    id: u64,
    state: Arc<StubState>,
    default_reply: String,
    call_delay: Option<Duration>,
    fail_close: bool,
    alive: AtomicBool,
    closed: AtomicBool,
}

impl StubSession {
    /// Simulate the device dropping the session
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for StubSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn call(&self, request: &str) -> Result<RpcReply, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed(self.id));
        }
        let message_id = self.state.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.requests.lock().push(request.to_string());

        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.script.lock().pop_front();
        let data = match scripted {
            None => self.default_reply.clone(),
            Some(ScriptedReply::Data(data)) => data,
            Some(ScriptedReply::Error(err)) => return Err(err),
            Some(ScriptedReply::Delayed(delay, data)) => {
                tokio::time::sleep(delay).await;
                data
            }
        };

        Ok(RpcReply {
            message_id: message_id.to_string(),
            data,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(TransportError::Io("close failed".to_string()));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.is_closed()
    }
}
