//! Test utilities for codelens-core

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::graph::FileUpdate;
use crate::model::*;

fn module_for(file: &str) -> String {
    crate::workspace::ProjectLayout::default().module_id(Path::new(file))
}

/// A unit spanning `start..=end` in `file`.
pub fn unit(id: &str, kind: UnitKind, file: &str, start: u32, end: u32) -> SourceUnit {
    let id = UnitId::new(id);
    let mut metadata = BTreeMap::new();
    metadata.insert("module".to_string(), module_for(file));
    SourceUnit {
        name: id.local_name().to_string(),
        parent: if kind == UnitKind::Module { None } else { id.parent() },
        content_hash: content_hash(format!("{}:{}:{}", id, start, end).as_bytes()),
        id,
        kind,
        language: Language::from_path(Path::new(file)),
        location: SourceLocation {
            file: PathBuf::from(file),
            start_line: start,
            end_line: end,
            start_byte: 0,
            end_byte: 0,
        },
        signature: None,
        doc_summary: None,
        metadata,
    }
}

pub fn module(file: &str) -> SourceUnit {
    unit(&module_for(file), UnitKind::Module, file, 1, 100)
}

pub fn function(id: &str, file: &str, start: u32) -> SourceUnit {
    unit(id, UnitKind::Function, file, start, start + 2)
}

/// A static edge attributed to `file`.
pub fn edge(from: &str, to: &str, kind: EdgeKind, confidence: Confidence, file: &str) -> Edge {
    let resolution = Resolution { target: Some(UnitId::new(to)), confidence, reason: None };
    Edge::from_resolution(UnitId::new(from), kind, resolution, UnitId::new(to).local_name(), PathBuf::from(file), 1, 0)
}

pub fn call(from: &str, to: &str, file: &str) -> Edge {
    edge(from, to, EdgeKind::Calls, Confidence::Resolved, file)
}

pub fn unresolved_call(from: &str, symbol: &str, file: &str) -> Edge {
    Edge::from_resolution(
        UnitId::new(from),
        EdgeKind::Calls,
        Resolution::unresolved(ReasonCode::UnsupportedReferenceShape),
        symbol,
        PathBuf::from(file),
        1,
        0,
    )
}

pub fn update(file: &str, units: Vec<SourceUnit>, edges: Vec<Edge>) -> FileUpdate {
    FileUpdate::new(file, units, edges)
}

/// Create a repository with a specific file structure
pub fn create_repo_with_structure(structure: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    for (path, content) in structure {
        let full_path = root.join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full_path, content).unwrap();
    }

    temp_dir
}
