//! Entry point heuristics for dead-code analysis

use std::collections::BTreeSet;

use crate::graph::GraphSnapshot;
use crate::impact::is_test_unit;
use crate::model::*;

/// Names that frameworks and CLIs invoke by convention.
const ENTRY_NAMES: &[&str] = &["main", "__main__", "run", "cli", "app", "setup", "teardown", "constructor"];

/// Name prefixes of handlers registered by frameworks.
const ENTRY_PREFIXES: &[&str] = &["handle_", "cmd_", "on_", "test_", "pytest_"];

/// Units invoked from outside the static call graph.
///
/// Covers module-level code, tests, conventional entry names, decorated units
/// (framework registration), dunder methods, and exports of package index files.
pub fn detect_entry_points(snapshot: &GraphSnapshot) -> Vec<UnitId> {
    let mut entries: BTreeSet<UnitId> = BTreeSet::new();
    for unit in snapshot.units() {
        if is_entry_point(snapshot, unit) {
            entries.insert(unit.id.clone());
        }
    }
    entries.into_iter().collect()
}

fn is_entry_point(snapshot: &GraphSnapshot, unit: &SourceUnit) -> bool {
    let name = unit.name.as_str();
    match unit.kind {
        UnitKind::Module | UnitKind::Block => return true,
        UnitKind::Class | UnitKind::Function | UnitKind::Method => {}
    }
    if is_test_unit(unit) || ENTRY_NAMES.contains(&name) || ENTRY_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return true;
    }
    if unit.kind == UnitKind::Method && name.starts_with("__") && name.ends_with("__") {
        return true;
    }
    if snapshot.edges_from(unit.id.as_str()).any(|e| e.kind == EdgeKind::Decorates) {
        return true;
    }
    let exported = unit.metadata.get("exported").is_some_and(|v| v == "true");
    let index_file = unit
        .location
        .file
        .file_stem()
        .is_some_and(|s| s == "index" || s == "__init__");
    exported && index_file
}
