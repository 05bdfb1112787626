//! Graph store: single writer, many readers, copy-on-write snapshots
//!
//! Every write clones the current snapshot, mutates the clone and swaps it in
//! behind an `Arc`. Readers keep whatever snapshot they grabbed, so no reader
//! ever observes a partially applied upsert.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diff::{FileDelta, GraphDiff};
use crate::error::CoreError;
use crate::model::*;

pub type EdgeKey = u64;

/// Everything one file contributed to the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub content_hash: String,
    pub units: Vec<UnitId>,
    pub edges: Vec<EdgeKey>,
}

/// Replacement contribution for one file.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub content_hash: String,
    pub units: Vec<SourceUnit>,
    pub edges: Vec<Edge>,
}

impl FileUpdate {
    /// The file hash is taken from the file's module unit when present.
    pub fn new(path: impl Into<PathBuf>, units: Vec<SourceUnit>, edges: Vec<Edge>) -> Self {
        let path = path.into();
        let content_hash = units
            .iter()
            .find(|u| u.kind == UnitKind::Module && u.location.file == path)
            .map(|u| u.content_hash.clone())
            .unwrap_or_default();
        FileUpdate { path, content_hash, units, edges }
    }

    pub fn removal(path: impl Into<PathBuf>) -> Self {
        FileUpdate { path: path.into(), content_hash: String::new(), units: Vec::new(), edges: Vec::new() }
    }
}

/// A runtime-observed call or reference between two known ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEdge {
    pub from: UnitId,
    pub to: UnitId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Static edges confirmed and upgraded to `both`.
    pub reconciled: usize,
    /// New observed-only edges.
    pub added: usize,
    /// Observations whose source unit is not in the graph.
    pub skipped: usize,
}

/// Full set of units and edges at one point in time.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    version: u64,
    units: HashMap<UnitId, SourceUnit>,
    edges: HashMap<EdgeKey, Edge>,
    next_edge: EdgeKey,
    forward: HashMap<UnitId, Vec<EdgeKey>>,
    reverse: HashMap<UnitId, Vec<EdgeKey>>,
    files: BTreeMap<PathBuf, FileEntry>,
    /// Derived cross-file links, replaced as a whole.
    links: Vec<EdgeKey>,
}

impl std::fmt::Debug for GraphSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSnapshot")
            .field("version", &self.version)
            .field("file_count", &self.files.len())
            .field("unit_count", &self.units.len())
            .field("edge_count", &self.edges.len())
            .finish()
    }
}

impl GraphSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonically increasing write counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn unit(&self, id: &str) -> Option<&SourceUnit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// Iterate over all units.
    pub fn units(&self) -> impl Iterator<Item = &SourceUnit> {
        self.units.values()
    }

    /// Iterate over all edges.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Outgoing edges of a unit.
    pub fn edges_from<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.forward
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(move |key| self.edges.get(key))
    }

    /// Incoming edges of a unit. Unresolved edges never appear here.
    pub fn edges_to<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.reverse
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(move |key| self.edges.get(key))
    }

    pub fn unresolved_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().filter(|e| e.is_unresolved())
    }

    /// Edges derived by matching link facts across files.
    pub fn links(&self) -> impl Iterator<Item = &Edge> {
        self.links.iter().filter_map(|key| self.edges.get(key))
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &FileEntry)> {
        self.files.iter()
    }

    pub fn file(&self, path: &Path) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Edges attributed to `path`.
    pub fn edges_in_file<'a>(&'a self, path: &Path) -> impl Iterator<Item = &'a Edge> + 'a {
        self.files.get(path).into_iter().flat_map(|entry| &entry.edges).filter_map(|key| self.edges.get(key))
    }

    /// Units of a file in source order.
    pub fn units_in_file(&self, path: &Path) -> Vec<&SourceUnit> {
        let mut units: Vec<&SourceUnit> = self
            .files
            .get(path)
            .map(|entry| entry.units.iter().filter_map(|id| self.units.get(id)).collect())
            .unwrap_or_default();
        units.sort_by_key(|u| (u.location.start_line, u.location.end_line));
        units
    }

    /// Units directly contained in `id`.
    pub fn children(&self, id: &str) -> Vec<&SourceUnit> {
        let Some(unit) = self.units.get(id) else {
            return Vec::new();
        };
        self.units_in_file(&unit.location.file)
            .into_iter()
            .filter(|u| u.parent.as_ref().is_some_and(|p| p.as_str() == id))
            .collect()
    }

    /// Units whose local name matches exactly.
    pub fn find_by_name(&self, name: &str) -> Vec<&SourceUnit> {
        let mut found: Vec<&SourceUnit> = self.units.values().filter(|u| u.name == name).collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    fn attach_edge(&mut self, edge: Edge) -> EdgeKey {
        let key = self.next_edge;
        self.next_edge += 1;
        self.forward.entry(edge.from.clone()).or_default().push(key);
        if let Some(to) = &edge.to {
            self.reverse.entry(to.clone()).or_default().push(key);
        }
        self.edges.insert(key, edge);
        key
    }

    fn detach_edge(&mut self, key: EdgeKey) {
        let Some(edge) = self.edges.remove(&key) else {
            return;
        };
        if let Some(keys) = self.forward.get_mut(&edge.from) {
            keys.retain(|k| *k != key);
            if keys.is_empty() {
                self.forward.remove(&edge.from);
            }
        }
        if let Some(to) = &edge.to {
            if let Some(keys) = self.reverse.get_mut(to) {
                keys.retain(|k| *k != key);
                if keys.is_empty() {
                    self.reverse.remove(to);
                }
            }
        }
    }

    /// Drop everything attributed to `path`. Returns the removed units.
    fn remove_contribution(&mut self, path: &Path) -> (Vec<SourceUnit>, usize) {
        let Some(entry) = self.files.remove(path) else {
            return (Vec::new(), 0);
        };
        let edge_count = entry.edges.len();
        for key in entry.edges {
            self.detach_edge(key);
        }
        let mut removed = Vec::new();
        for id in entry.units {
            if self.units.get(&id).is_some_and(|u| u.location.file == path) {
                if let Some(unit) = self.units.remove(&id) {
                    removed.push(unit);
                }
            }
        }
        (removed, edge_count)
    }

    fn check_update(update: &FileUpdate) -> Result<(), CoreError> {
        for unit in &update.units {
            if unit.location.file != update.path {
                return Err(CoreError::ForeignUnit {
                    id: unit.id.clone(),
                    expected: update.path.clone(),
                    actual: unit.location.file.clone(),
                });
            }
        }
        for edge in &update.edges {
            edge.validate()?;
            if edge.file != update.path {
                return Err(CoreError::InvalidEdge {
                    from: edge.from.clone(),
                    reason: format!("attributed to {:?} but upserted with {:?}", edge.file, update.path),
                });
            }
        }
        Ok(())
    }

    /// Remove the file's contribution, then insert the replacement.
    fn apply_update(&mut self, update: FileUpdate) -> Result<FileDelta, CoreError> {
        Self::check_update(&update)?;
        let FileUpdate { path, content_hash, units, edges } = update;
        let mut delta = FileDelta::new(path.clone());

        let (old_units, old_edges) = self.remove_contribution(&path);
        delta.edges_before = old_edges;
        let mut old_hashes: HashMap<UnitId, String> =
            old_units.into_iter().map(|u| (u.id, u.content_hash)).collect();

        if units.is_empty() && edges.is_empty() {
            let mut removed: Vec<UnitId> = old_hashes.into_keys().collect();
            removed.sort();
            delta.removed = removed;
            return Ok(delta);
        }

        let mut entry = FileEntry { content_hash, units: Vec::with_capacity(units.len()), edges: Vec::new() };
        let mut seen = HashSet::new();
        for unit in units {
            if !seen.insert(unit.id.clone()) {
                warn!("Duplicate unit {} in {:?}, keeping the first", unit.id, path);
                continue;
            }
            if let Some(owner) = self.units.get(&unit.id) {
                warn!("Unit {} already defined in {:?}, skipping copy in {:?}", unit.id, owner.location.file, path);
                delta.conflicts.push(unit.id);
                continue;
            }
            match old_hashes.remove(&unit.id) {
                Some(old) if old != unit.content_hash => delta.modified.push(unit.id.clone()),
                Some(_) => {}
                None => delta.added.push(unit.id.clone()),
            }
            entry.units.push(unit.id.clone());
            self.units.insert(unit.id.clone(), unit);
        }

        let mut removed: Vec<UnitId> = old_hashes.into_keys().collect();
        removed.sort();
        delta.removed = removed;

        for edge in edges {
            let key = self.attach_edge(edge);
            entry.edges.push(key);
        }
        delta.edges_after = entry.edges.len();
        self.files.insert(path, entry);
        Ok(delta)
    }

    /// Swap the derived links. Links from units that are not in the graph are dropped.
    fn set_links(&mut self, edges: Vec<Edge>) -> Result<(), CoreError> {
        for key in std::mem::take(&mut self.links) {
            self.detach_edge(key);
        }
        for edge in edges {
            edge.validate()?;
            if !self.units.contains_key(&edge.from) {
                debug!("Dropping link from unknown unit {}", edge.from);
                continue;
            }
            let key = self.attach_edge(edge);
            self.links.push(key);
        }
        Ok(())
    }

    fn merge_observed(&mut self, observed: Vec<ObservedEdge>) -> MergeStats {
        let mut stats = MergeStats::default();
        for ObservedEdge { from, to, kind } in observed {
            let keys = self.forward.get(&from).cloned().unwrap_or_default();
            let mut matched = false;
            for key in keys {
                if let Some(edge) = self.edges.get_mut(&key) {
                    if edge.same_link(&from, &to, &kind) {
                        edge.provenance = edge.provenance.merge(Provenance::Observed);
                        edge.confidence = edge.confidence.reconcile_observed();
                        matched = true;
                    }
                }
            }
            if matched {
                stats.reconciled += 1;
                continue;
            }

            let Some(source) = self.units.get(&from) else {
                stats.skipped += 1;
                continue;
            };
            let file = source.location.file.clone();
            let line = source.location.start_line;
            let confidence = if self.units.contains_key(&to) { Confidence::Resolved } else { Confidence::Inferred };
            let edge = Edge {
                symbol: to.local_name().to_string(),
                from,
                to: Some(to),
                kind,
                confidence,
                provenance: Provenance::Observed,
                reason: None,
                file: file.clone(),
                line,
                column: 0,
            };
            let key = self.attach_edge(edge);
            if let Some(entry) = self.files.get_mut(&file) {
                entry.edges.push(key);
            }
            stats.added += 1;
        }
        stats
    }
}

/// The graph store: the single source of truth for units and edges.
pub struct GraphStore {
    current: RwLock<Arc<GraphSnapshot>>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").field("snapshot", &self.snapshot()).finish()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::from_snapshot(GraphSnapshot::new())
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        GraphStore { current: RwLock::new(Arc::new(snapshot)), writer: Mutex::new(()) }
    }

    /// Read-only consistent view. Later writes never affect it.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    /// Swap in a previously persisted snapshot.
    pub fn restore(&self, snapshot: GraphSnapshot) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    fn write<T>(&self, f: impl FnOnce(&mut GraphSnapshot) -> Result<T, CoreError>) -> Result<T, CoreError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = GraphSnapshot::clone(&self.snapshot());
        next.version += 1;
        let out = f(&mut next)?;
        debug!("Graph store advanced to version {}", next.version);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(out)
    }

    /// Atomically replace everything attributed to `path`.
    pub fn upsert_file(&self, path: &Path, units: Vec<SourceUnit>, edges: Vec<Edge>) -> Result<FileDelta, CoreError> {
        let update = FileUpdate::new(path, units, edges);
        self.write(|graph| graph.apply_update(update))
    }

    fn commit(&self, updates: Vec<FileUpdate>, links: Option<Vec<Edge>>, replace: bool) -> Result<GraphDiff, CoreError> {
        self.write(|graph| {
            let version = graph.version;
            if replace {
                *graph = GraphSnapshot { version, ..GraphSnapshot::default() };
            }
            let mut diff = GraphDiff::new(version);
            for update in updates {
                diff.files.push(graph.apply_update(update)?);
            }
            if let Some(links) = links {
                graph.set_links(links)?;
            }
            Ok(diff)
        })
    }

    /// Replace several files in one transaction.
    pub fn upsert_files(&self, updates: Vec<FileUpdate>) -> Result<GraphDiff, CoreError> {
        self.commit(updates, None, false)
    }

    /// Replace several files and every derived link in one transaction.
    pub fn upsert_with_links(&self, updates: Vec<FileUpdate>, links: Vec<Edge>) -> Result<GraphDiff, CoreError> {
        self.commit(updates, Some(links), false)
    }

    /// Discard the current graph and load `updates` as the new content.
    pub fn replace_all(&self, updates: Vec<FileUpdate>) -> Result<GraphDiff, CoreError> {
        self.commit(updates, None, true)
    }

    pub fn replace_all_with_links(&self, updates: Vec<FileUpdate>, links: Vec<Edge>) -> Result<GraphDiff, CoreError> {
        self.commit(updates, Some(links), true)
    }

    pub fn remove_file(&self, path: &Path) -> Result<FileDelta, CoreError> {
        self.write(|graph| graph.apply_update(FileUpdate::removal(path)))
    }

    pub fn get_unit(&self, id: &str) -> Result<SourceUnit, CoreError> {
        self.snapshot().unit(id).cloned().ok_or_else(|| CoreError::not_found(id))
    }

    pub fn edges_from(&self, id: &str) -> Vec<Edge> {
        self.snapshot().edges_from(id).cloned().collect()
    }

    pub fn edges_to(&self, id: &str) -> Vec<Edge> {
        self.snapshot().edges_to(id).cloned().collect()
    }

    /// Reconcile runtime-observed edges with the static graph.
    pub fn merge_observed(&self, observed: Vec<ObservedEdge>) -> Result<MergeStats, CoreError> {
        self.write(|graph| Ok(graph.merge_observed(observed)))
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
