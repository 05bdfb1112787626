//! Orchestrates parallel indexing
//!
//! A run has three phases. Files are parsed in parallel and their symbols
//! published to the shared [`SymbolTable`]; references are then resolved
//! statically against the complete table; finally weak results are offered
//! to the external resolver, if one is configured. The output is one
//! [`FileUpdate`] per touched file, ready for the graph store.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codelens_core::config::{ExternalResolverConfig, SKIP_DIRS};
use codelens_core::{
    Confidence, Edge, EdgeKind, FileSymbols, FileUpdate, LensConfig, ParseDiagnostic, ParseOutput, ProjectLayout,
    RawReference, ReasonCode, Resolution, SourceFile, SourceUnit, SymbolTable, UnitId, content_hash, link_edges,
};
use codelens_resolve::{ExternalRequest, ReferenceKey, ResolutionCache, Resolver, ResolverPool};
use globset::GlobSet;
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::languages::AdapterRegistry;
use crate::links;
use crate::parser_pool::create_parser_pool;

/// A parsed file waiting for resolution.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub source: SourceFile,
    pub output: ParseOutput,
}

impl ParsedFile {
    pub fn path(&self) -> &Path {
        &self.source.path
    }
}

/// Counters for one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub files_parsed: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub units: usize,
    pub edges: usize,
    pub unresolved: usize,
    pub external_requests: usize,
    pub cache_hits: usize,
}

/// Result of an indexing run.
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub updates: Vec<FileUpdate>,
    /// Files that parsed with syntax errors.
    pub diagnostics: BTreeMap<PathBuf, Vec<ParseDiagnostic>>,
    pub stats: IndexStats,
}

enum FileRead {
    Parsed(Box<ParsedFile>),
    Removed(PathBuf),
    Failed,
}

/// Drives adapters, the symbol table and the resolvers for one project.
#[derive(Clone)]
pub struct Coordinator {
    root: PathBuf,
    config: Arc<LensConfig>,
    registry: AdapterRegistry,
    symbols: Arc<SymbolTable>,
    cache: Arc<ResolutionCache>,
    external: Option<Arc<ResolverPool>>,
    exclude: GlobSet,
}

impl Coordinator {
    pub fn new(root: impl Into<PathBuf>, config: LensConfig) -> Result<Self, IndexError> {
        let root = root.into();
        let exclude = config.exclude_set()?;
        let layout = ProjectLayout::discover(&root, &config);

        let external = match &config.resolver.external {
            Some(external) if !external.command.is_empty() => match ResolverPool::from_config(external, &root) {
                Ok(pool) => {
                    info!("External resolver enabled: {}", pool.name());
                    Some(Arc::new(pool))
                }
                Err(e) => {
                    warn!("External resolver disabled: {}", e);
                    None
                }
            },
            _ => None,
        };

        Ok(Coordinator {
            root,
            config: Arc::new(config),
            registry: AdapterRegistry::new(create_parser_pool()),
            symbols: Arc::new(SymbolTable::new(layout)),
            cache: Arc::new(ResolutionCache::new()),
            external,
            exclude,
        })
    }

    /// Use a specific external resolver pool instead of the configured one.
    pub fn with_external(mut self, pool: ResolverPool) -> Self {
        self.external = Some(Arc::new(pool));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &LensConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Route, storage and mock edges across every indexed file.
    pub fn links(&self) -> Vec<Edge> {
        link_edges(&self.symbols.link_facts())
    }

    /// Whether a project-relative path would be indexed.
    pub fn is_indexable(&self, path: &Path) -> bool {
        if !self.registry.supports(path) || self.exclude.is_match(path) {
            return false;
        }
        !path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            SKIP_DIRS.contains(&name.as_ref())
        })
    }

    /// Every indexable file under the root, project-relative and sorted.
    pub fn discover(&self) -> Vec<PathBuf> {
        let respect = self.config.index.respect_gitignore;
        let walker = WalkBuilder::new(&self.root)
            .hidden(false)
            .ignore(respect)
            .git_ignore(respect)
            .git_global(respect)
            .git_exclude(respect)
            .require_git(false)
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_some_and(|t| t.is_dir()) && SKIP_DIRS.contains(&name.as_ref()))
            })
            .build();

        let max_bytes = self.config.index.max_file_bytes;
        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else { continue };
            if !self.is_indexable(relative) {
                continue;
            }
            if entry.metadata().is_ok_and(|m| m.len() > max_bytes) {
                debug!("Skipping large file {:?}", relative);
                continue;
            }
            files.push(relative.to_path_buf());
        }
        files.sort();
        files
    }

    /// Parse one file into a [`SourceFile`] plus parse output.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedFile, IndexError> {
        let adapter = self.registry.for_path(path).ok_or_else(|| IndexError::Unsupported(path.to_path_buf()))?;
        let absolute = self.root.join(path);
        let content = std::fs::read_to_string(&absolute)
            .map_err(|source| IndexError::Io { path: path.to_path_buf(), source })?;
        let module_id = self.symbols.layout().module_id(path);
        let source = SourceFile::new(path, module_id, content);
        let mut output = adapter.parse(&source)?;
        output.links = links::extract(&source, &output.units);
        Ok(ParsedFile { source, output })
    }

    /// Index the whole tree from scratch.
    pub async fn index_all(&self) -> Result<IndexOutcome, IndexError> {
        let paths = self.discover();
        info!("Indexing {} files under {}", paths.len(), self.root.display());
        self.run(paths, true).await
    }

    /// Re-index exactly the given project-relative files. Missing files are removed.
    pub async fn reindex(&self, paths: &[PathBuf]) -> Result<IndexOutcome, IndexError> {
        let mut paths: Vec<PathBuf> = paths.iter().filter(|p| self.is_indexable(p)).cloned().collect();
        paths.sort();
        paths.dedup();
        debug!("Re-indexing {} files", paths.len());
        self.run(paths, false).await
    }

    async fn run(&self, paths: Vec<PathBuf>, full: bool) -> Result<IndexOutcome, IndexError> {
        let this = self.clone();
        let (parsed, removed, failed, resolutions) =
            tokio::task::spawn_blocking(move || this.parse_and_resolve(paths, full))
                .await
                .map_err(|e| IndexError::Pool(e.to_string()))??;

        let mut outcome = IndexOutcome::default();
        outcome.stats.files_failed = failed;
        let resolutions = self.strengthen(&parsed, resolutions, &mut outcome.stats).await;

        for (file, resolved) in parsed.into_iter().zip(resolutions) {
            let update = build_update(file.source.path.clone(), file.output.units, &file.output.references, resolved);
            outcome.stats.files_parsed += 1;
            outcome.stats.units += update.units.len();
            outcome.stats.edges += update.edges.len();
            outcome.stats.unresolved += update.edges.iter().filter(|e| e.is_unresolved()).count();
            if !file.output.diagnostics.is_empty() {
                outcome.diagnostics.insert(file.source.path, file.output.diagnostics);
            }
            outcome.updates.push(update);
        }
        for path in removed {
            self.cache.invalidate(&path);
            outcome.updates.push(FileUpdate::removal(path));
            outcome.stats.files_removed += 1;
        }

        info!(
            "Indexed {} files ({} removed): {} units, {} edges, {} unresolved",
            outcome.stats.files_parsed,
            outcome.stats.files_removed,
            outcome.stats.units,
            outcome.stats.edges,
            outcome.stats.unresolved
        );
        Ok(outcome)
    }

    /// Parse `paths`, publish their symbols, then resolve every reference statically.
    fn parse_and_resolve(
        &self,
        paths: Vec<PathBuf>,
        full: bool,
    ) -> Result<(Vec<ParsedFile>, Vec<PathBuf>, usize, Vec<Vec<Resolution>>), IndexError> {
        let reads: Vec<Result<FileRead, IndexError>> = paths
            .par_iter()
            .map(|path| match self.parse_file(path) {
                Ok(parsed) => Ok(FileRead::Parsed(Box::new(parsed))),
                Err(IndexError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                    Ok(FileRead::Removed(path.clone()))
                }
                Err(IndexError::Io { path, source }) => {
                    warn!("Cannot read {:?}: {}", path, source);
                    Ok(FileRead::Failed)
                }
                Err(e) => Err(e),
            })
            .collect();

        let mut parsed = Vec::new();
        let mut removed = Vec::new();
        let mut failed = 0;
        for read in reads {
            match read? {
                FileRead::Parsed(file) => parsed.push(*file),
                FileRead::Removed(path) => removed.push(path),
                FileRead::Failed => failed += 1,
            }
        }

        if full {
            self.symbols.clear();
        }
        for path in &removed {
            self.symbols.remove_file(path);
        }
        for file in &parsed {
            self.symbols.insert(FileSymbols::from_output(&file.source, &file.output));
        }

        let resolver = Resolver::new(&*self.symbols).with_max_depth(self.config.resolver.max_alias_depth);
        let resolutions: Vec<Vec<Resolution>> = parsed
            .par_iter()
            .map(|file| {
                file.output
                    .references
                    .iter()
                    .map(|reference| resolver.resolve(&file.source.path, reference))
                    .collect()
            })
            .collect();
        Ok((parsed, removed, failed, resolutions))
    }

    /// Offer weak static results to the external resolver and keep the stronger answer.
    async fn strengthen(
        &self,
        parsed: &[ParsedFile],
        mut resolutions: Vec<Vec<Resolution>>,
        stats: &mut IndexStats,
    ) -> Vec<Vec<Resolution>> {
        let Some(pool) = &self.external else {
            return resolutions;
        };
        let extensions = match &self.config.resolver.external {
            Some(external) => external.extensions.clone(),
            None => ExternalResolverConfig::default().extensions,
        };

        let mut requests = Vec::new();
        let mut pending: HashMap<String, (usize, usize, String, ReferenceKey)> = HashMap::new();
        for (file_idx, file) in parsed.iter().enumerate() {
            let path = &file.source.path;
            let wanted = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|x| x == ext));
            if !wanted {
                continue;
            }
            let hash = content_hash(file.source.content.as_bytes());
            for (ref_idx, reference) in file.output.references.iter().enumerate() {
                if !is_weak(&resolutions[file_idx][ref_idx]) {
                    continue;
                }
                let key = ReferenceKey { line: reference.position.line, column: reference.position.column };
                if let Some(cached) = self.cache.get(path, &hash, key) {
                    stats.cache_hits += 1;
                    let slot = &mut resolutions[file_idx][ref_idx];
                    *slot = slot.clone().stronger(cached);
                    continue;
                }
                let id = format!("{}#{}", path.display(), ref_idx);
                requests.push(ExternalRequest {
                    id: id.clone(),
                    file: path.clone(),
                    line: reference.position.line,
                    column: reference.position.column,
                });
                pending.insert(id, (file_idx, ref_idx, hash.clone(), key));
            }
        }
        if requests.is_empty() {
            return resolutions;
        }

        stats.external_requests = requests.len();
        debug!("Sending {} weak references to {}", requests.len(), pool.name());
        let answers = pool.resolve_all(requests).await;
        for (id, answer) in answers {
            let Some((file_idx, ref_idx, hash, key)) = pending.remove(&id) else { continue };
            if !matches!(answer.reason, Some(ReasonCode::Timeout) | Some(ReasonCode::ResolverFailed)) {
                self.cache.insert(&parsed[file_idx].source.path, &hash, key, answer.clone());
            }
            let slot = &mut resolutions[file_idx][ref_idx];
            *slot = slot.clone().stronger(answer);
        }
        resolutions
    }
}

/// Results the external resolver may improve on.
fn is_weak(resolution: &Resolution) -> bool {
    match resolution.confidence {
        Confidence::Inferred => true,
        Confidence::Unresolved => resolution.reason != Some(ReasonCode::UnsupportedReferenceShape),
        _ => false,
    }
}

/// Turn one file's units and resolved references into a store update.
pub fn build_update(
    path: PathBuf,
    units: Vec<SourceUnit>,
    references: &[RawReference],
    resolutions: Vec<Resolution>,
) -> FileUpdate {
    let mut edges: Vec<Edge> = Vec::with_capacity(references.len() + units.len());
    for unit in &units {
        if let Some(parent) = &unit.parent {
            edges.push(contains_edge(parent, &unit.id, &unit.name, &path, unit.location.start_line));
        }
    }
    for (reference, resolution) in references.iter().zip(resolutions) {
        edges.push(Edge::from_resolution(
            reference.from.clone(),
            reference.kind.clone(),
            resolution,
            reference.text.clone(),
            path.clone(),
            reference.position.line,
            reference.position.column,
        ));
    }
    FileUpdate::new(path, units, edges)
}

fn contains_edge(parent: &UnitId, child: &UnitId, name: &str, path: &Path, line: u32) -> Edge {
    Edge::from_resolution(
        parent.clone(),
        EdgeKind::Contains,
        Resolution::resolved(child.clone()),
        name,
        path.to_path_buf(),
        line,
        0,
    )
}
