//! Indexing errors

use std::path::PathBuf;

use codelens_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("parser pool error: {0}")]
    Pool(String),

    #[error("no parser adapter for {0:?}")]
    Unsupported(PathBuf),

    #[error(transparent)]
    Core(#[from] CoreError),
}
