//! Symbol table for cross-file resolution

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::links::LinkFacts;
use crate::model::{Language, UnitId, UnitKind};
use crate::parse::{Binding, Declaration, ParseOutput, SourceFile};
use crate::workspace::{Origin, ProjectLayout, is_declaration_file, normalize};

/// Extensions tried, in order, when an ECMAScript specifier omits one.
const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "d.ts", "js", "jsx", "mjs", "cjs"];

/// Members and bases of one class, for structural member lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: UnitId,
    pub bases: Vec<String>,
    pub members: BTreeMap<String, UnitId>,
}

/// Everything the resolver needs to know about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSymbols {
    pub path: PathBuf,
    pub module_id: String,
    pub language: Language,
    pub declarations: Vec<Declaration>,
    pub bindings: Vec<Binding>,
    pub classes: BTreeMap<UnitId, ClassInfo>,
    /// File uses explicit export syntax; only exported names are visible to importers.
    pub explicit_exports: bool,
    pub declaration_only: bool,
    pub links: LinkFacts,
}

impl FileSymbols {
    pub fn from_output(file: &SourceFile, output: &ParseOutput) -> Self {
        let mut classes: BTreeMap<UnitId, ClassInfo> = output
            .units
            .iter()
            .filter(|u| u.kind == UnitKind::Class)
            .map(|u| {
                let bases = output.class_bases.get(&u.id).cloned().unwrap_or_default();
                (u.id.clone(), ClassInfo { id: u.id.clone(), bases, members: BTreeMap::new() })
            })
            .collect();
        for decl in &output.declarations {
            if let (Some(class), Some(unit)) = (classes.get_mut(&decl.scope), &decl.unit) {
                class.members.insert(decl.name.clone(), unit.clone());
            }
        }

        let language = file.language();
        let explicit_exports = language.is_ecmascript()
            && (output.declarations.iter().any(|d| d.exported || d.default_export)
                || output.bindings.iter().any(|b| b.exported));

        FileSymbols {
            path: file.path.clone(),
            module_id: file.module_id.clone(),
            language,
            declarations: output.declarations.clone(),
            bindings: output.bindings.clone(),
            classes,
            explicit_exports,
            declaration_only: is_declaration_file(&file.path),
            links: output.links.clone(),
        }
    }

    /// Declarations of `name` directly inside `scope`.
    pub fn declarations_in<'a>(&'a self, scope: &'a str, name: &'a str) -> impl Iterator<Item = &'a Declaration> + 'a {
        self.declarations
            .iter()
            .filter(move |d| d.name == name && d.scope.as_str() == scope)
    }

    /// Import binding visible in this file's scope under `name`.
    pub fn scope_binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.in_scope && b.local == name)
    }

    /// Binding exported under `name` (re-exports and export lists).
    pub fn export_binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.exported && b.local == name)
    }

    /// `export * from` / `from m import *` bindings.
    pub fn star_bindings(&self, exported: bool) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(move |b| {
            b.local == "*" && if exported { b.exported } else { b.in_scope }
        })
    }

    pub fn is_class(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }
}

/// Result of mapping an import specifier to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLookup {
    Project(PathBuf),
    /// Not part of the tree; `package` is used to build the pseudo-id.
    External { package: String },
    Missing,
}

/// Read access to symbols, as needed by the resolver.
pub trait SymbolSource: Send + Sync {
    fn file_symbols(&self, path: &Path) -> Option<Arc<FileSymbols>>;

    /// Map an import specifier, as written in `from`, to a file.
    fn resolve_module(&self, specifier: &str, from: &Path) -> ModuleLookup;

    /// File declaring the given class unit.
    fn class_file(&self, class: &UnitId) -> Option<PathBuf>;

    fn origin(&self, path: &Path) -> Origin;

    /// An implementation file shadows a declaration-only file of the same module.
    fn has_implementation(&self, declaration_file: &Path) -> bool;
}

/// Symbol table shared by all indexing workers. Thread-safe for concurrent access.
pub struct SymbolTable {
    layout: ProjectLayout,
    files: DashMap<PathBuf, Arc<FileSymbols>>,
    /// Module id → file. A module may have a declaration file and an implementation.
    modules: DashMap<String, Vec<PathBuf>>,
    classes: DashMap<UnitId, PathBuf>,
}

impl SymbolTable {
    pub fn new(layout: ProjectLayout) -> Self {
        SymbolTable {
            layout,
            files: DashMap::new(),
            modules: DashMap::new(),
            classes: DashMap::new(),
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Insert or replace the symbols of one file.
    pub fn insert(&self, symbols: FileSymbols) {
        self.remove_file(&symbols.path);
        let path = symbols.path.clone();
        {
            let mut entry = self.modules.entry(symbols.module_id.clone()).or_default();
            entry.push(path.clone());
            // Implementation files win over declaration files.
            entry.sort_by_key(|p| is_declaration_file(p));
        }
        for class in symbols.classes.keys() {
            self.classes.insert(class.clone(), path.clone());
        }
        self.files.insert(path, Arc::new(symbols));
    }

    /// Remove all symbols for a file (useful for incremental re-indexing).
    pub fn remove_file(&self, path: &Path) {
        if let Some((_, old)) = self.files.remove(path) {
            if let Some(mut entry) = self.modules.get_mut(&old.module_id) {
                entry.retain(|p| p != path);
            }
            self.modules.remove_if(&old.module_id, |_, paths| paths.is_empty());
            for class in old.classes.keys() {
                self.classes.remove_if(class, |_, p| p == path);
            }
        }
    }

    pub fn clear(&self) {
        self.files.clear();
        self.modules.clear();
        self.classes.clear();
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Primary file for a module id.
    pub fn module_file(&self, module_id: &str) -> Option<PathBuf> {
        self.modules.get(module_id).and_then(|paths| paths.first().cloned())
    }

    /// Link facts of every file that has any, sorted by path.
    pub fn link_facts(&self) -> Vec<(PathBuf, LinkFacts)> {
        let mut all: Vec<(PathBuf, LinkFacts)> = self
            .files
            .iter()
            .filter(|e| !e.value().links.is_empty())
            .map(|e| (e.key().clone(), e.value().links.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// All file symbols, sorted by path. Used for persistence.
    pub fn export(&self) -> Vec<FileSymbols> {
        let mut all: Vec<FileSymbols> = self.files.iter().map(|e| e.value().as_ref().clone()).collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    pub fn import(&self, files: Vec<FileSymbols>) {
        for symbols in files {
            self.insert(symbols);
        }
    }

    fn resolve_python(&self, specifier: &str, from: &Path) -> ModuleLookup {
        let dots = specifier.chars().take_while(|c| *c == '.').count();
        if dots == 0 {
            return match self.module_file(specifier) {
                Some(path) => ModuleLookup::Project(path),
                None => ModuleLookup::External { package: specifier.to_string() },
            };
        }

        let module_id = self.layout.module_id(from);
        let is_package = from
            .file_stem()
            .is_some_and(|s| s == "__init__");
        let mut package: Vec<&str> = module_id.split('.').filter(|s| !s.is_empty()).collect();
        if !is_package {
            package.pop();
        }
        for _ in 1..dots {
            if package.pop().is_none() {
                return ModuleLookup::Missing;
            }
        }
        let rest = &specifier[dots..];
        let mut target = package.join(".");
        if !rest.is_empty() {
            if !target.is_empty() {
                target.push('.');
            }
            target.push_str(rest);
        }
        match self.module_file(&target) {
            Some(path) => ModuleLookup::Project(path),
            None => ModuleLookup::Missing,
        }
    }

    fn resolve_script(&self, specifier: &str, from: &Path) -> ModuleLookup {
        let relative = specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../");
        let base = if relative {
            let dir = from.parent().unwrap_or(Path::new(""));
            Some(normalize(&dir.join(specifier)))
        } else {
            self.layout.alias_target(specifier)
        };

        match base {
            Some(base) => match self.find_script_file(&base) {
                Some(path) => ModuleLookup::Project(path),
                None => ModuleLookup::Missing,
            },
            None => ModuleLookup::External { package: package_name(specifier) },
        }
    }

    fn find_script_file(&self, base: &Path) -> Option<PathBuf> {
        if self.files.contains_key(base) {
            return Some(base.to_path_buf());
        }
        let name = base.file_name()?.to_string_lossy().into_owned();
        // `./util.js` may point at `util.ts` in TypeScript projects.
        let stem = match name.rsplit_once('.') {
            Some((stem, ext)) if SCRIPT_EXTENSIONS.contains(&ext) => Some(stem.to_string()),
            _ => None,
        };
        let mut candidates = Vec::new();
        for ext in SCRIPT_EXTENSIONS {
            candidates.push(base.with_file_name(format!("{}.{}", name, ext)));
        }
        if let Some(stem) = stem {
            for ext in SCRIPT_EXTENSIONS {
                candidates.push(base.with_file_name(format!("{}.{}", stem, ext)));
            }
        }
        for ext in SCRIPT_EXTENSIONS {
            candidates.push(base.join(format!("index.{}", ext)));
        }
        candidates.into_iter().find(|c| self.files.contains_key(c))
    }
}

impl SymbolSource for SymbolTable {
    fn file_symbols(&self, path: &Path) -> Option<Arc<FileSymbols>> {
        self.files.get(path).map(|e| Arc::clone(e.value()))
    }

    fn resolve_module(&self, specifier: &str, from: &Path) -> ModuleLookup {
        match Language::from_path(from) {
            Language::Python => self.resolve_python(specifier, from),
            Language::TypeScript | Language::JavaScript => self.resolve_script(specifier, from),
            Language::Other => ModuleLookup::Missing,
        }
    }

    fn class_file(&self, class: &UnitId) -> Option<PathBuf> {
        self.classes.get(class).map(|p| p.value().clone())
    }

    fn origin(&self, path: &Path) -> Origin {
        self.layout.origin(path)
    }

    fn has_implementation(&self, declaration_file: &Path) -> bool {
        let module_id = self.layout.module_id(declaration_file);
        self.modules
            .get(&module_id)
            .is_some_and(|paths| paths.iter().any(|p| !is_declaration_file(p)))
    }
}

/// npm package name of a bare specifier: `lodash/get` → `lodash`, `@a/b/c` → `@a/b`.
pub fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match parts.next() {
        Some(scope) if scope.starts_with('@') => match parts.next() {
            Some(name) => format!("{}/{}", scope, name),
            None => scope.to_string(),
        },
        Some(name) => name.to_string(),
        None => specifier.to_string(),
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new(ProjectLayout::default())
    }
}
