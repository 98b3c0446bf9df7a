//! Execution engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Upper bound on a single remote call; unset means the transport decides
    #[serde(with = "crate::domains::seconds::optional", default)]
    pub call_timeout: Option<Duration>,

    /// Upper bound on establishing a session
    #[serde(with = "crate::domains::seconds", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Directory under which each run's archive is created
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Print one progress character per call to stdout
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            call_timeout: None,
            connect_timeout: default_connect_timeout(),
            results_dir: default_results_dir(),
            progress: true,
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.connect_timeout.as_secs(),
            "connect_timeout",
            self.domain_name(),
        )?;

        if let Some(timeout) = self.call_timeout {
            validate_positive(timeout.as_secs(), "call_timeout", self.domain_name())?;
        }

        if self.results_dir.as_os_str().is_empty() {
            return Err(self.validation_error("results_dir cannot be empty"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_progress() -> bool {
    true
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}
