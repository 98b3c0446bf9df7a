//! Session cache shared by all workers of a run
//!
//! Hosts configured with `reuseconnection` get one session per
//! (client, endpoint) key for the whole run. Every key has its own async
//! lock, so concurrent first uses of a key dial exactly once while other
//! keys proceed in parallel. Hosts without reuse get a fresh session per
//! call that the caller closes.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, TransportError};
use crate::transport::{same_session, Credentials, Endpoint, Session, Transport};

type SessionKey = (u32, Endpoint);
type SessionSlot = Arc<tokio::sync::Mutex<Option<Arc<dyn Session>>>>;

pub struct SessionRegistry {
    transport: Arc<dyn Transport>,
    connect_timeout: Option<Duration>,
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
    dials: AtomicU64,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connect_timeout: None,
            sessions: Mutex::new(HashMap::new()),
            dials: AtomicU64::new(0),
        }
    }

    /// Bound the time spent establishing a session
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Get a session for `client` against `endpoint`
    ///
    /// With `reuse` the cached session for the key is returned, dialing it on
    /// first use. Without `reuse` a new session is dialed and the caller owns
    /// it. A cached session that is no longer alive is discarded and
    /// reported as expired; the next acquire dials again.
    pub async fn acquire(
        &self,
        client: u32,
        endpoint: &Endpoint,
        credentials: &Credentials,
        reuse: bool,
    ) -> Result<Arc<dyn Session>, ExecutionError> {
        if !reuse {
            return self.dial(endpoint, credentials).await;
        }

        let slot = self.slot(client, endpoint);
        let mut cached = slot.lock().await;

        if let Some(cached_session) = (*cached).clone() {
            if cached_session.is_alive() {
                return Ok(cached_session);
            }
            let expired = cached_session;
            *cached = None;
            drop(cached);
            warn!(
                client,
                endpoint = %endpoint,
                session = expired.id(),
                "Cached session has expired"
            );
            if let Err(e) = expired.close().await {
                debug!("Closing expired session {}: {}", expired.id(), e);
            }
            return Err(ExecutionError::SessionExpired);
        }

        let session = self.dial(endpoint, credentials).await?;
        debug!(client, endpoint = %endpoint, session = session.id(), "Cached new session");
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Drop the cached session for a key if it is still `session`, closing it
    pub async fn invalidate(&self, client: u32, endpoint: &Endpoint, session: &Arc<dyn Session>) {
        let slot = {
            let sessions = self.sessions.lock();
            match sessions.get(&(client, endpoint.clone())) {
                Some(slot) => slot.clone(),
                None => return,
            }
        };

        let removed = {
            let mut cached = slot.lock().await;
            match cached.as_ref() {
                Some(current) if same_session(current, session) => cached.take(),
                _ => None,
            }
        };

        if let Some(removed) = removed {
            debug!(client, endpoint = %endpoint, session = removed.id(), "Invalidated cached session");
            if let Err(e) = removed.close().await {
                debug!("Closing invalidated session {}: {}", removed.id(), e);
            }
        }
    }

    /// Close every cached session; returns how many were closed
    ///
    /// Close failures are logged and otherwise ignored.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<(SessionKey, SessionSlot)> = self.sessions.lock().drain().collect();

        let closes = slots.into_iter().map(|((client, endpoint), slot)| async move {
            let session = slot.lock().await.take()?;
            if let Err(e) = session.close().await {
                warn!(
                    client,
                    endpoint = %endpoint,
                    session = session.id(),
                    "Failed to close session: {}",
                    e
                );
            }
            Some(())
        });

        let closed = join_all(closes).await.into_iter().flatten().count();
        if closed > 0 {
            info!("Closed {} cached session(s)", closed);
        }
        closed
    }

    /// Number of sessions currently cached
    pub async fn cached_count(&self) -> usize {
        let slots: Vec<SessionSlot> = self.sessions.lock().values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Number of sessions dialed over the registry's lifetime
    pub fn dial_count(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }

    fn slot(&self, client: u32, endpoint: &Endpoint) -> SessionSlot {
        self.sessions
            .lock()
            .entry((client, endpoint.clone()))
            .or_default()
            .clone()
    }

    async fn dial(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>, ExecutionError> {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let dial = self.transport.dial(endpoint, credentials);
        let session = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, dial)
                .await
                .map_err(|_| TransportError::Dial {
                    endpoint: endpoint.to_string(),
                    message: format!("timed out after {:?}", timeout),
                })??,
            None => dial.await?,
        };
        Ok(session)
    }
}
