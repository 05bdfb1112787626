//! Explicit per-project handle
//!
//! Every query and patch goes through a [`ProjectContext`]. Nothing lives in
//! process-wide state, so several projects can be open in one process.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codelens_core::cache::{PersistedState, load_state, save_state};
use codelens_core::{
    CoreError, Cycle, Edge, FileUpdate, GraphDiff, GraphSnapshot, GraphStore, ImpactReport, LensConfig, MergeStats,
    ObservedEdge, ParseDiagnostic, SourceUnit, UnitId, Usage, content_hash, detect_entry_points,
};
use codelens_indexer::{Coordinator, IndexError, IndexOutcome, IndexStats};
use codelens_resolve::cache::FileResolutions;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::history::PatchHistory;
use crate::patch::{
    AppliedEdit, BatchReport, CancelToken, DiskFs, FilePlan, Patch, PatchError, PatchProposal, PatchRequest,
    PatchState, SourceFs, UnitEdit, ValidationFailure, ValidationLevel, ValidationReport, apply_edits, rollback,
    validate_replacement, write_all,
};

/// Persisted form of the resolution cache.
type Resolutions = Vec<(PathBuf, FileResolutions)>;

const MAX_SUGGESTIONS: usize = 5;

/// Summary of an index, refresh or resync.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// Store version after the write.
    pub sequence: u64,
    pub stats: IndexStats,
    pub files: Vec<PathBuf>,
    pub units_added: usize,
    pub units_removed: usize,
    pub units_modified: usize,
    /// Unit ids defined by more than one file; the first owner keeps them.
    pub conflicts: Vec<UnitId>,
    pub parse_errors: BTreeMap<PathBuf, Vec<ParseDiagnostic>>,
}

impl IndexReport {
    fn new(outcome: IndexOutcome, diff: &GraphDiff) -> Self {
        IndexReport {
            sequence: diff.sequence,
            stats: outcome.stats,
            files: diff.files.iter().map(|f| f.path.clone()).collect(),
            units_added: diff.added(),
            units_removed: diff.removed(),
            units_modified: diff.modified(),
            conflicts: diff.files.iter().flat_map(|f| f.conflicts.iter().cloned()).collect(),
            parse_errors: outcome.diagnostics,
        }
    }
}

/// An edit that passed lookup and the staleness check.
struct CheckedEdit {
    index: usize,
    unit: SourceUnit,
    patch: Patch,
    impact: ImpactReport,
    report: ValidationReport,
}

/// One open project: configuration, indexer, graph store and patch engine.
pub struct ProjectContext {
    root: PathBuf,
    coordinator: Coordinator,
    store: GraphStore,
    fs: Arc<dyn SourceFs>,
    history: PatchHistory,
    /// Serializes patch batches.
    patch_lock: Mutex<()>,
}

impl ProjectContext {
    /// A context with an empty graph. Nothing is read from `.codelens/`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        let config = LensConfig::load(&root)?;
        let coordinator = Coordinator::new(root, config)?;
        Ok(Self::with_coordinator(coordinator))
    }

    pub fn with_coordinator(coordinator: Coordinator) -> Self {
        let root = coordinator.root().to_path_buf();
        ProjectContext {
            fs: Arc::new(DiskFs::new(&root)),
            history: PatchHistory::new(&root),
            store: GraphStore::new(),
            patch_lock: Mutex::new(()),
            coordinator,
            root,
        }
    }

    /// Route patch reads and writes through `fs`.
    pub fn with_fs(mut self, fs: Arc<dyn SourceFs>) -> Self {
        self.fs = fs;
        self
    }

    /// Open a project: restore persisted state and refresh changed files,
    /// or index everything if there is no usable state.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let ctx = Self::new(root)?;
        if ctx.restore()? {
            ctx.refresh().await?;
        } else {
            ctx.index_all().await?;
        }
        Ok(ctx)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &LensConfig {
        self.coordinator.config()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn history(&self) -> &PatchHistory {
        &self.history
    }

    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.store.snapshot()
    }

    /// Load `.codelens/state.bin`. Returns whether any state was found.
    pub fn restore(&self) -> Result<bool, EngineError> {
        let Some(state) = load_state::<Resolutions>(&self.root)? else {
            return Ok(false);
        };
        info!(
            "Restored {} units from state saved at {} by {}",
            state.graph.unit_count(),
            state.saved_at,
            state.tool_version
        );
        self.coordinator.symbols().import(state.symbols);
        self.coordinator.cache().import(state.resolutions);
        self.store.restore(state.graph);
        Ok(true)
    }

    pub fn save(&self) -> Result<(), EngineError> {
        let snapshot = self.store.snapshot();
        let state = PersistedState::new(
            GraphSnapshot::clone(&snapshot),
            self.coordinator.symbols().export(),
            self.coordinator.cache().export(),
        );
        save_state(&self.root, &state)?;
        Ok(())
    }

    /// Index the whole tree and replace the graph.
    pub async fn index_all(&self) -> Result<IndexReport, EngineError> {
        let mut outcome = self.coordinator.index_all().await?;
        let updates = std::mem::take(&mut outcome.updates);
        let diff = self.store.replace_all_with_links(updates, self.coordinator.links())?;
        Ok(IndexReport::new(outcome, &diff))
    }

    /// Re-index files whose content differs from the graph, plus files that
    /// appeared or disappeared since the graph was built.
    pub async fn refresh(&self) -> Result<IndexReport, EngineError> {
        let snapshot = self.store.snapshot();
        let on_disk = self.coordinator.discover();
        let present: BTreeSet<&PathBuf> = on_disk.iter().collect();

        let mut changed = Vec::new();
        for path in &on_disk {
            let current = match std::fs::read(self.root.join(path)) {
                Ok(bytes) => content_hash(&bytes),
                Err(e) => {
                    debug!("Could not hash {:?}: {}", path, e);
                    changed.push(path.clone());
                    continue;
                }
            };
            if snapshot.file(path).map(|f| f.content_hash.as_str()) != Some(current.as_str()) {
                changed.push(path.clone());
            }
        }

        let mut dropped = Vec::new();
        for (path, _) in snapshot.files() {
            if present.contains(path) {
                continue;
            }
            if self.coordinator.is_indexable(path) {
                changed.push(path.clone());
            } else {
                dropped.push(path.clone());
            }
        }

        if changed.is_empty() && dropped.is_empty() {
            debug!("Graph is up to date");
            return Ok(IndexReport { sequence: snapshot.version(), ..IndexReport::default() });
        }
        info!("{} file(s) changed, {} no longer indexed", changed.len(), dropped.len());

        let mut outcome = self.coordinator.reindex(&changed).await?;
        for path in dropped {
            self.coordinator.symbols().remove_file(&path);
            self.coordinator.cache().invalidate(&path);
            outcome.updates.push(FileUpdate::removal(path));
            outcome.stats.files_removed += 1;
        }
        let updates = std::mem::take(&mut outcome.updates);
        let diff = self.store.upsert_with_links(updates, self.coordinator.links())?;
        Ok(IndexReport::new(outcome, &diff))
    }

    /// Re-parse and re-resolve exactly `paths`, then upsert them in one write.
    pub async fn resync_files(&self, paths: &[PathBuf]) -> Result<IndexReport, EngineError> {
        let mut outcome = self.coordinator.reindex(paths).await?;
        let updates = std::mem::take(&mut outcome.updates);
        let diff = self.store.upsert_with_links(updates, self.coordinator.links())?;
        debug!("Resynced {} file(s) at version {}", diff.files.len(), diff.sequence);
        Ok(IndexReport::new(outcome, &diff))
    }

    pub fn get_unit(&self, id: &str) -> Result<SourceUnit, CoreError> {
        let snapshot = self.snapshot();
        snapshot.unit(id).cloned().ok_or_else(|| not_found(&snapshot, id))
    }

    /// Impact report for `id`; `depth` defaults to the configured depth.
    pub fn check_impact(&self, id: &str, depth: Option<usize>) -> Result<ImpactReport, CoreError> {
        let snapshot = self.snapshot();
        if !snapshot.contains(id) {
            return Err(not_found(&snapshot, id));
        }
        let config = &self.config().impact;
        codelens_core::check_impact(&snapshot, id, depth.unwrap_or(config.default_depth), &config.severity)
    }

    pub fn find_usages(&self, id: &str) -> Result<Vec<Usage>, CoreError> {
        let snapshot = self.snapshot();
        if !snapshot.contains(id) {
            return Err(not_found(&snapshot, id));
        }
        Ok(codelens_core::find_usages(&snapshot, id))
    }

    pub fn entry_points(&self) -> Vec<UnitId> {
        detect_entry_points(&self.snapshot())
    }

    /// Unreachable definitions. Without explicit entries, detected entry points are used.
    pub fn dead_code(&self, entry_points: Option<&[UnitId]>) -> Vec<UnitId> {
        let snapshot = self.snapshot();
        match entry_points {
            Some(entries) => codelens_core::dead_code(&snapshot, entries),
            None => codelens_core::dead_code(&snapshot, &detect_entry_points(&snapshot)),
        }
    }

    pub fn cycles(&self) -> Vec<Cycle> {
        codelens_core::cycles(&self.snapshot())
    }

    /// Every unresolved edge, in file and line order.
    pub fn unresolved(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.snapshot().unresolved_edges().cloned().collect();
        edges.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)).then(a.column.cmp(&b.column)));
        edges
    }

    pub fn merge_observed(&self, observed: Vec<ObservedEdge>) -> Result<MergeStats, CoreError> {
        let stats = self.store.merge_observed(observed)?;
        info!("Merged observed edges: {} reconciled, {} added, {} skipped", stats.reconciled, stats.added, stats.skipped);
        Ok(stats)
    }

    /// Check impact and validate one patch without writing anything.
    pub fn propose_patch(&self, request: &PatchRequest) -> Result<PatchProposal, PatchError> {
        let snapshot = self.snapshot();
        let mut sources = HashMap::new();
        let edit = self.check_edit(&snapshot, 0, request, &mut sources)?;
        Ok(PatchProposal {
            unit: edit.unit.id,
            state: edit.patch.state,
            impact: edit.impact,
            validation: edit.report,
        })
    }

    /// Apply `requests` as one atomic batch.
    ///
    /// Every edit is looked up, checked for staleness and validated before
    /// any file is written. If a write fails, the batch is cancelled after
    /// the first write, or the resync fails, every touched file is restored.
    pub async fn apply_batch(&self, requests: Vec<PatchRequest>, cancel: &CancelToken) -> Result<BatchReport, PatchError> {
        if requests.is_empty() {
            return Err(PatchError::Empty);
        }
        let _batch = self.patch_lock.lock().await;
        let snapshot = self.snapshot();

        let mut sources = HashMap::new();
        let mut checked = Vec::with_capacity(requests.len());
        let mut warnings = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            let edit = self.check_edit(&snapshot, index, request, &mut sources)?;
            if let Some(failure) = edit.report.first_failure() {
                warn!("Batch rejected at edit {}: {}", index, failure);
                return Err(PatchError::Validation { index, failure: failure.clone(), report: edit.report });
            }
            warnings.extend(edit.impact.warnings.iter().map(|w| format!("{}: {}", edit.unit.id, w)));
            warnings.extend(edit.report.warnings.iter().map(|w| format!("{}: {}", edit.unit.id, w)));
            checked.push(edit);
        }

        let mut by_file: BTreeMap<PathBuf, Vec<UnitEdit>> = BTreeMap::new();
        for edit in &checked {
            by_file.entry(edit.unit.location.file.clone()).or_default().push(UnitEdit {
                index: edit.index,
                unit: edit.unit.id.clone(),
                start_byte: edit.unit.location.start_byte,
                end_byte: edit.unit.location.end_byte,
                replacement: edit.patch.request.new_source.clone(),
            });
        }
        let mut plans = Vec::with_capacity(by_file.len());
        for (path, edits) in by_file {
            let Some(original) = sources.remove(&path) else {
                continue;
            };
            let updated = apply_edits(&path, &original, &edits)?;
            let first_index = edits.iter().map(|e| e.index).min().unwrap_or_default();
            plans.push(FilePlan { path, original, updated, first_index });
        }
        plans.sort_by_key(|p| p.first_index);

        write_all(self.fs.as_ref(), &plans, cancel)?;
        for edit in &mut checked {
            edit.patch.advance(PatchState::Applied)?;
        }

        let files: Vec<PathBuf> = plans.iter().map(|p| p.path.clone()).collect();
        let resynced = match self.resync_files(&files).await {
            Ok(report) => report,
            Err(e) => {
                error!("Resync after patch failed: {}; restoring {} file(s)", e, plans.len());
                let rolled_back = rollback(self.fs.as_ref(), &plans);
                if rolled_back {
                    if let Err(e) = self.resync_files(&files).await {
                        warn!("Graph may be stale for {:?}: {}", files, e);
                    }
                }
                let source = match e {
                    EngineError::Index(e) => e,
                    EngineError::Core(e) => IndexError::Core(e),
                    EngineError::Patch(e) => return Err(e),
                };
                return Err(PatchError::Resync { source, rolled_back });
            }
        };
        for (path, diagnostics) in &resynced.parse_errors {
            warnings.push(format!("{:?} has {} syntax error(s) after the patch", path, diagnostics.len()));
        }

        let after = self.snapshot();
        let mut applied = Vec::with_capacity(checked.len());
        for edit in &mut checked {
            edit.patch.advance(PatchState::Resynced)?;
            let new_hash = match after.unit(edit.unit.id.as_str()) {
                Some(unit) => unit.content_hash.clone(),
                None => {
                    warnings.push(format!("{} no longer exists after the patch", edit.unit.id));
                    content_hash(edit.patch.request.new_source.as_bytes())
                }
            };
            applied.push(AppliedEdit {
                unit: edit.unit.id.clone(),
                file: edit.unit.location.file.clone(),
                old_hash: edit.unit.content_hash.clone(),
                new_hash,
            });
        }

        if let Err(e) = self.history.record(&applied) {
            warn!("Could not append to patch history: {}", e);
            warnings.push(format!("patch history not updated: {}", e));
        }
        if let Err(e) = self.save() {
            warn!("Could not persist state after patch: {}", e);
        }
        info!("Applied {} edit(s) across {} file(s)", applied.len(), files.len());

        Ok(BatchReport {
            state: PatchState::Resynced,
            applied,
            files,
            impacts: checked.into_iter().map(|edit| edit.impact).collect(),
            warnings,
            units_added: resynced.units_added,
            units_removed: resynced.units_removed,
            units_modified: resynced.units_modified,
        })
    }

    /// Look up, staleness-check, impact-check and validate one edit.
    fn check_edit(
        &self,
        snapshot: &GraphSnapshot,
        index: usize,
        request: &PatchRequest,
        sources: &mut HashMap<PathBuf, String>,
    ) -> Result<CheckedEdit, PatchError> {
        let id = request.unit_id.as_str();
        let Some(unit) = snapshot.unit(id).cloned() else {
            return Err(PatchError::UnitNotFound {
                index,
                id: request.unit_id.clone(),
                suggestions: suggest(snapshot, id),
            });
        };
        let path = unit.location.file.clone();

        let content = match sources.entry(path.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let text = self
                    .fs
                    .read(&path)
                    .map_err(|source| PatchError::Io { index, path: path.clone(), source, rolled_back: false })?;
                entry.insert(text)
            }
        };
        let old_source = content
            .get(unit.location.start_byte..unit.location.end_byte)
            .filter(|text| content_hash(text.as_bytes()) == unit.content_hash)
            .ok_or_else(|| PatchError::Stale { index, unit: unit.id.clone() })?;

        let adapter = self
            .coordinator
            .registry()
            .for_path(&path)
            .ok_or_else(|| PatchError::Unsupported { index, path: path.clone() })?;

        let mut patch = Patch::new(request.clone());
        let config = self.config();
        let impact = codelens_core::check_impact(snapshot, id, config.impact.default_depth, &config.impact.severity)
            .map_err(|_| PatchError::UnitNotFound { index, id: unit.id.clone(), suggestions: Vec::new() })?;
        patch.advance(PatchState::ImpactChecked)?;

        let report = validate_replacement(
            adapter.as_ref(),
            &unit,
            old_source,
            &request.new_source,
            config.patch.signature_policy,
            request.allow_breaking,
        )
        .unwrap_or_else(|e| ValidationReport {
            failures: vec![ValidationFailure::new(ValidationLevel::Syntax, "parse", format!("parser unavailable: {}", e))],
            ..ValidationReport::default()
        });
        patch.advance(if report.passed() { PatchState::Validated } else { PatchState::Rejected })?;
        debug!("Edit {} on {} is {:?}", index, unit.id, patch.state);

        Ok(CheckedEdit { index, unit, patch, impact, report })
    }
}

fn not_found(snapshot: &GraphSnapshot, id: &str) -> CoreError {
    CoreError::UnitNotFound { id: id.to_string(), suggestions: suggest(snapshot, id) }
}

/// Closest unit ids to `id`, best first.
fn suggest(snapshot: &GraphSnapshot, id: &str) -> Vec<String> {
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, &str)> = snapshot
        .units()
        .filter_map(|unit| matcher.fuzzy_match(unit.id.as_str(), id).map(|score| (score, unit.id.as_str())))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(MAX_SUGGESTIONS).map(|(_, id)| id.to_string()).collect()
}
