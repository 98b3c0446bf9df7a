//! Remote call transport abstraction
//!
//! The engine only needs to dial a device, issue request/reply calls over
//! the resulting session and close it again. Anything that can do that,
//! whether NETCONF over SSH, over TCP or a test stub, plugs in through
//! [`Transport`].

pub mod tcp;

use async_trait::async_trait;
use hammer_config::ConnectionConfig;
use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

/// Network location of a managed device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Renders `host:port`, bracketing IPv6 literals
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<&ConnectionConfig> for Endpoint {
    fn from(config: &ConnectionConfig) -> Self {
        Self::new(config.hostname.clone(), config.port)
    }
}

/// Login for a device
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl From<&ConnectionConfig> for Credentials {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

/// Reply to a single call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    pub message_id: String,
    /// Content of the reply element
    pub data: String,
}

/// An established channel to a device
///
/// Implementations must accept concurrent `call`s; a shared session is used
/// by all concurrent actions of one client against one host.
#[async_trait]
pub trait Session: Send + Sync {
    /// Protocol assigned session id
    fn id(&self) -> u64;

    /// Send one operation body and wait for its reply
    async fn call(&self, request: &str) -> Result<RpcReply, TransportError>;

    /// Tear the session down
    async fn close(&self) -> Result<(), TransportError>;

    /// False once the session is known to be unusable
    fn is_alive(&self) -> bool {
        true
    }
}

/// Establishes sessions
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>, TransportError>;
}

/// Identity comparison for shared sessions
pub(crate) fn same_session(a: &Arc<dyn Session>, b: &Arc<dyn Session>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
