//! Pipeline error types.
//!
//! Malformed records never surface here: they are counted and dropped inside
//! the pipeline. A [`PipelineError`] always means the pipeline has to stop,
//! either because a required sink branch gave up or because the source failed.

use salesflow_connectors::ConnectorError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("sink branch {branch} failed: {source}")]
    Sink {
        branch: String,
        #[source]
        source: ConnectorError,
    },

    #[error("sink branch {0} stopped unexpectedly")]
    BranchClosed(String),
}

impl PipelineError {
    /// The sink branch that failed, if the error came from one.
    pub fn branch(&self) -> Option<&str> {
        match self {
            PipelineError::Sink { branch, .. } | PipelineError::BranchClosed(branch) => {
                Some(branch)
            }
            _ => None,
        }
    }
}
