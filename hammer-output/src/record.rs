//! Per-call outcome record

use serde::{Deserialize, Serialize};

/// The observable result of one remote call
///
/// Column names follow the archive's CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(rename = "Client")]
    pub client: u32,

    /// Protocol assigned session id, 0 when no session was obtained
    #[serde(rename = "SessionID")]
    pub session_id: u64,

    #[serde(rename = "Hostname")]
    pub hostname: String,

    #[serde(rename = "Operation")]
    pub operation: String,

    /// Milliseconds since the run started, taken when the call finished
    #[serde(rename = "When")]
    pub when: f64,

    /// Empty on success
    #[serde(rename = "Err")]
    pub error: String,

    /// Round trip time of the call in milliseconds
    #[serde(rename = "Latency")]
    pub latency: f64,
}

impl OutcomeRecord {
    pub fn new(client: u32, hostname: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            client,
            session_id: 0,
            hostname: hostname.into(),
            operation: operation.into(),
            when: 0.0,
            error: String::new(),
            latency: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}
