//! Errors raised while talking to an external resolver

use std::time::Duration;

use codelens_core::ReasonCode;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("external resolver command is empty")]
    NotConfigured,

    #[error("failed to spawn resolver {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("resolver i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resolver exited without answering")]
    NoResponse,

    #[error("malformed resolver response: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("resolver timed out after {0:?}")]
    Timeout(Duration),
}

impl ResolveError {
    /// Reason code recorded on every reference of the failed batch.
    pub fn reason(&self) -> ReasonCode {
        match self {
            ResolveError::Timeout(_) => ReasonCode::Timeout,
            _ => ReasonCode::ResolverFailed,
        }
    }
}
