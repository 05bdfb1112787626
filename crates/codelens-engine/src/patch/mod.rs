//! Patch and validation engine
//!
//! A patch replaces the source of one unit. It moves through
//! `Proposed → ImpactChecked → Validated → Applied → Resynced`; a patch may
//! be `Rejected` once impact has been checked. Batches are atomic: every
//! touched file is snapshotted before the first write and restored if any
//! later step fails.

pub mod apply;
pub mod batch;
pub mod validate;

use std::path::PathBuf;

use codelens_core::{ImpactReport, UnitId};
use codelens_indexer::IndexError;
use serde::{Deserialize, Serialize};

pub use apply::{UnitEdit, apply_edits, reindent};
pub use batch::{CancelToken, DiskFs, FilePlan, SourceFs, rollback, write_all};
pub use validate::{ValidationFailure, ValidationLevel, ValidationReport, validate_replacement};

/// Replace the source of `unit_id` with `new_source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub unit_id: UnitId,
    pub new_source: String,
    /// Accept signature changes that would break callers.
    #[serde(default)]
    pub allow_breaking: bool,
}

impl PatchRequest {
    pub fn new(unit_id: impl Into<UnitId>, new_source: impl Into<String>) -> Self {
        PatchRequest { unit_id: unit_id.into(), new_source: new_source.into(), allow_breaking: false }
    }

    pub fn allow_breaking(mut self) -> Self {
        self.allow_breaking = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchState {
    Proposed,
    ImpactChecked,
    Validated,
    Applied,
    Resynced,
    Rejected,
}

impl PatchState {
    pub fn can_advance_to(self, next: PatchState) -> bool {
        use PatchState::*;
        matches!(
            (self, next),
            (Proposed, ImpactChecked)
                | (ImpactChecked, Validated)
                | (Validated, Applied)
                | (Applied, Resynced)
                | (ImpactChecked, Rejected)
                | (Validated, Rejected)
        )
    }
}

/// A patch and the states it has been through.
#[derive(Debug, Clone, Serialize)]
pub struct Patch {
    pub request: PatchRequest,
    pub state: PatchState,
    pub history: Vec<PatchState>,
}

impl Patch {
    pub fn new(request: PatchRequest) -> Self {
        Patch { request, state: PatchState::Proposed, history: vec![PatchState::Proposed] }
    }

    pub fn advance(&mut self, next: PatchState) -> Result<(), PatchError> {
        if !self.state.can_advance_to(next) {
            return Err(PatchError::InvalidTransition { from: self.state, to: next });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

/// Outcome of proposing a single patch without applying it.
#[derive(Debug, Clone, Serialize)]
pub struct PatchProposal {
    pub unit: UnitId,
    pub state: PatchState,
    pub impact: ImpactReport,
    pub validation: ValidationReport,
}

/// One applied edit, as recorded in the history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEdit {
    pub unit: UnitId,
    pub file: PathBuf,
    pub old_hash: String,
    pub new_hash: String,
}

/// Result of an applied and resynced batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub state: PatchState,
    pub applied: Vec<AppliedEdit>,
    pub files: Vec<PathBuf>,
    pub impacts: Vec<ImpactReport>,
    pub warnings: Vec<String>,
    pub units_added: usize,
    pub units_removed: usize,
    pub units_modified: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("edit {index}: unit not found: {id}")]
    UnitNotFound { index: usize, id: UnitId, suggestions: Vec<String> },

    #[error("edit {index}: {unit} changed on disk since it was indexed")]
    Stale { index: usize, unit: UnitId },

    #[error("edit {index}: {failure}")]
    Validation { index: usize, failure: ValidationFailure, report: ValidationReport },

    #[error("edit {index} overlaps edit {other} in {path:?}")]
    Overlap { index: usize, other: usize, path: PathBuf },

    #[error("edit {index}: no parser adapter for {path:?}")]
    Unsupported { index: usize, path: PathBuf },

    #[error("edit {index}: i/o error on {path:?}: {source}; rolled back: {rolled_back}")]
    Io {
        index: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
        rolled_back: bool,
    },

    #[error("batch cancelled; rolled back: {rolled_back}")]
    Cancelled { rolled_back: bool },

    #[error("illegal patch transition {from:?} -> {to:?}")]
    InvalidTransition { from: PatchState, to: PatchState },

    #[error("resync failed: {source}; rolled back: {rolled_back}")]
    Resync {
        #[source]
        source: IndexError,
        rolled_back: bool,
    },

    #[error("empty batch")]
    Empty,
}

impl PatchError {
    /// Index of the edit that caused the failure, if a single edit did.
    pub fn failing_index(&self) -> Option<usize> {
        match self {
            PatchError::UnitNotFound { index, .. }
            | PatchError::Stale { index, .. }
            | PatchError::Validation { index, .. }
            | PatchError::Overlap { index, .. }
            | PatchError::Unsupported { index, .. }
            | PatchError::Io { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PatchError::UnitNotFound { .. } => "unit_not_found",
            PatchError::Stale { .. } => "stale_unit",
            PatchError::Validation { .. } => "validation_failed",
            PatchError::Overlap { .. } => "overlapping_edits",
            PatchError::Unsupported { .. } => "unsupported_language",
            PatchError::Io { .. } => "io_error",
            PatchError::Cancelled { .. } => "cancelled",
            PatchError::InvalidTransition { .. } => "invalid_transition",
            PatchError::Resync { .. } => "resync_failed",
            PatchError::Empty => "empty_batch",
        }
    }
}
