//! Append-only log of applied patches (`.codelens/history.jsonl`)

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use codelens_core::UnitId;
use codelens_core::cache::{ensure_cache_dir, history_path};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::patch::AppliedEdit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    /// Entries written by the same batch share this id.
    pub batch: String,
    pub unit: UnitId,
    pub file: PathBuf,
    pub old_hash: String,
    pub new_hash: String,
}

#[derive(Debug, Clone)]
pub struct PatchHistory {
    root: PathBuf,
}

impl PatchHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PatchHistory { root: root.into() }
    }

    pub fn path(&self) -> PathBuf {
        history_path(&self.root)
    }

    /// Record one applied batch.
    pub fn record(&self, edits: &[AppliedEdit]) -> std::io::Result<Vec<HistoryEntry>> {
        let timestamp = Utc::now();
        let batch = format!("{}", timestamp.format("%Y%m%dT%H%M%S%.6fZ"));
        let entries: Vec<HistoryEntry> = edits
            .iter()
            .map(|edit| HistoryEntry {
                timestamp,
                batch: batch.clone(),
                unit: edit.unit.clone(),
                file: edit.file.clone(),
                old_hash: edit.old_hash.clone(),
                new_hash: edit.new_hash.clone(),
            })
            .collect();

        ensure_cache_dir(&self.root).map_err(std::io::Error::other)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.path())?;
        for entry in &entries {
            let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
            writeln!(file, "{}", line)?;
        }
        Ok(entries)
    }

    /// All entries, oldest first. Unreadable lines are skipped.
    pub fn entries(&self) -> std::io::Result<Vec<HistoryEntry>> {
        read_entries(&self.path())
    }

    /// Entries touching `unit`, oldest first.
    pub fn for_unit(&self, unit: &str) -> std::io::Result<Vec<HistoryEntry>> {
        Ok(self.entries()?.into_iter().filter(|e| e.unit.as_str() == unit).collect())
    }
}

fn read_entries(path: &Path) -> std::io::Result<Vec<HistoryEntry>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Skipping history line {}: {}", number + 1, e),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let history = PatchHistory::new(dir.path());
        assert!(history.entries().unwrap().is_empty());

        let edit = AppliedEdit {
            unit: UnitId::new("user.validate_email"),
            file: PathBuf::from("user.py"),
            old_hash: "aa".into(),
            new_hash: "bb".into(),
        };
        history.record(std::slice::from_ref(&edit)).unwrap();
        history.record(&[AppliedEdit { unit: UnitId::new("signup.signup"), ..edit }]).unwrap();

        let entries = history.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(history.for_unit("signup.signup").unwrap().len(), 1);
        assert_eq!(entries[0].new_hash, "bb");
    }
}
