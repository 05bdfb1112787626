//! Per-file deltas produced by graph store writes

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::UnitId;

/// What one file upsert changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDelta {
    pub path: PathBuf,
    pub added: Vec<UnitId>,
    pub removed: Vec<UnitId>,
    /// Units present before and after whose content hash changed.
    pub modified: Vec<UnitId>,
    /// Incoming units skipped because another file already owns the id.
    pub conflicts: Vec<UnitId>,
    pub edges_before: usize,
    pub edges_after: usize,
}

impl FileDelta {
    pub fn new(path: PathBuf) -> Self {
        FileDelta { path, ..Default::default() }
    }

    /// Check if this delta is empty (no unit changes).
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Result of one write transaction against the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDiff {
    /// Snapshot version produced by the write.
    pub sequence: u64,
    pub files: Vec<FileDelta>,
}

impl GraphDiff {
    pub fn new(sequence: u64) -> Self {
        GraphDiff { sequence, files: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.files.iter().all(FileDelta::is_empty)
    }

    pub fn added(&self) -> usize {
        self.files.iter().map(|f| f.added.len()).sum()
    }

    pub fn removed(&self) -> usize {
        self.files.iter().map(|f| f.removed.len()).sum()
    }

    pub fn modified(&self) -> usize {
        self.files.iter().map(|f| f.modified.len()).sum()
    }
}
