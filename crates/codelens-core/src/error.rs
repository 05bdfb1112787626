//! Error types for the graph store and persisted state

use std::path::PathBuf;

use crate::model::UnitId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unit not found: {id}")]
    UnitNotFound { id: String, suggestions: Vec<String> },

    #[error("invalid edge from {from}: {reason}")]
    InvalidEdge { from: UnitId, reason: String },

    #[error("unit {id} is located in {actual:?}, not in {expected:?}")]
    ForeignUnit { id: UnitId, expected: PathBuf, actual: PathBuf },

    #[error("invalid configuration in {path:?}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("cache i/o error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl CoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        CoreError::UnitNotFound { id: id.into(), suggestions: Vec::new() }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io { path: path.into(), source }
    }
}
