//! Codelens Engine: project context, patch engine and consumer API
//!
//! A [`ProjectContext`] owns one project's configuration, indexer and graph
//! store. Queries read consistent snapshots; patches go through the
//! validation pipeline in [`patch`] and are resynced before they return.

pub mod api;
pub mod context;
pub mod error;
pub mod history;
pub mod patch;


pub use api::{ToolError, ToolResponse};
pub use context::{IndexReport, ProjectContext};
pub use error::EngineError;
pub use history::{HistoryEntry, PatchHistory};
pub use patch::{
    AppliedEdit, BatchReport, CancelToken, DiskFs, Patch, PatchError, PatchProposal, PatchRequest, PatchState, SourceFs,
    ValidationFailure, ValidationLevel, ValidationReport,
};
