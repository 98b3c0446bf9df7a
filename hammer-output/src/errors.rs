//! Error types for result persistence

use std::path::PathBuf;
use thiserror::Error;

pub type OutputResult<T> = Result<T, OutputError>;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Test plan error: {0}")]
    Plan(#[from] hammer_config::ConfigError),

    #[error("Sink error: {0}")]
    Sink(String),
}

impl OutputError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}
