//! Engine error type

use codelens_core::CoreError;
use codelens_indexer::IndexError;

use crate::patch::PatchError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Core(CoreError::UnitNotFound { .. }) => "unit_not_found",
            EngineError::Core(CoreError::Config { .. }) => "invalid_config",
            EngineError::Core(_) => "graph_error",
            EngineError::Index(_) => "index_error",
            EngineError::Patch(e) => e.code(),
        }
    }
}
