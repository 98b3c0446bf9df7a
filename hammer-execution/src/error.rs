//! Error types for the execution engine
//!
//! Errors that concern a single action never unwind a worker; they are
//! rendered into the action's outcome record. Only persistence failures
//! propagate out of a run.

use std::time::Duration;
use thiserror::Error;

/// Failures reported by a transport implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("dial {endpoint}: {message}")]
    Dial { endpoint: String, message: String },

    #[error("session {0} is closed")]
    Closed(u64),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered with an rpc-error; the session is still usable
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether the session the error came from can no longer carry calls
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, TransportError::Rpc(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("session has expired")]
    SessionExpired,

    #[error("no connection config for host {0}")]
    UnknownHost(String),

    #[error("{0} is not a supported operation")]
    UnsupportedOperation(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid expected pattern {pattern}: {message}, actual: {actual}")]
    InvalidPattern {
        pattern: String,
        message: String,
        actual: String,
    },

    #[error("expected response did not match, expected: {expected} actual: {actual}")]
    Mismatch { expected: String, actual: String },

    #[error("Failed to persist results: {0}")]
    Persistence(#[from] hammer_output::OutputError),

    #[error("Worker error: {0}")]
    WorkerError(String),
}

impl ExecutionError {
    /// Whether a cached session that produced this error must be discarded
    pub fn invalidates_session(&self) -> bool {
        match self {
            ExecutionError::Transport(err) => err.is_session_fatal(),
            ExecutionError::Timeout(_) | ExecutionError::SessionExpired => true,
            _ => false,
        }
    }
}
