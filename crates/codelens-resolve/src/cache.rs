//! Resolution cache keyed by file and reference position
//!
//! Entries for a file are only valid for the content hash they were computed
//! against. A hash mismatch or an explicit invalidation drops the whole file
//! entry in one delete.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use codelens_core::Resolution;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Position of a reference within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceKey {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileResolutions {
    pub content_hash: String,
    pub entries: BTreeMap<ReferenceKey, Resolution>,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub files: usize,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct ResolutionCache {
    files: DashMap<PathBuf, FileResolutions>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result, if the file still hashes to `content_hash`.
    pub fn get(&self, path: &Path, content_hash: &str, key: ReferenceKey) -> Option<Resolution> {
        let stale = {
            let entry = self.files.get(path)?;
            if entry.content_hash == content_hash {
                return entry.entries.get(&key).cloned();
            }
            true
        };
        if stale {
            self.files.remove(path);
        }
        None
    }

    pub fn insert(&self, path: &Path, content_hash: &str, key: ReferenceKey, resolution: Resolution) {
        let mut entry = self.files.entry(path.to_path_buf()).or_default();
        if entry.content_hash != content_hash {
            entry.content_hash = content_hash.to_string();
            entry.entries.clear();
        }
        entry.entries.insert(key, resolution);
    }

    /// Drop everything cached for `path`.
    pub fn invalidate(&self, path: &Path) {
        self.files.remove(path);
    }

    pub fn clear(&self) {
        self.files.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            files: self.files.len(),
            entries: self.files.iter().map(|e| e.entries.len()).sum(),
        }
    }

    /// All entries, sorted by path. Used for persistence.
    pub fn export(&self) -> Vec<(PathBuf, FileResolutions)> {
        let mut all: Vec<(PathBuf, FileResolutions)> =
            self.files.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn import(&self, entries: Vec<(PathBuf, FileResolutions)>) {
        for (path, resolutions) in entries {
            self.files.insert(path, resolutions);
        }
    }
}
