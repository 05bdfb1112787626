//! Static resolution of raw references
//!
//! A reference is looked up in the scope chain of its enclosing unit, then
//! through the file's import bindings. Bindings are followed across files
//! (imports, re-exports, export lists, default exports) until a declaration
//! is reached. Every followed alias is one hop; the walk stops on a revisited
//! alias or after `max_depth` hops and reports the last symbol it reached.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use codelens_core::parse::{Binding, Declaration, ImportedName, RawReference, ReceiverType, ReferenceShape};
use codelens_core::symbols::{FileSymbols, ModuleLookup, SymbolSource};
use codelens_core::workspace::{Origin, is_declaration_file};
use codelens_core::{Confidence, Language, ReasonCode, Resolution, UnitId};
use tracing::trace;

use crate::builtins::builtin_id;

/// Default cap on followed aliases per reference.
pub const DEFAULT_MAX_DEPTH: usize = 15;

/// A symbol reached during a walk.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// A declaration or class member with its canonical id.
    Unit { file: PathBuf, id: UnitId },
    /// The module object of a project file.
    Module { file: PathBuf, id: UnitId },
    /// Pseudo-id outside the project.
    External(UnitId),
}

#[derive(Debug)]
enum Step {
    Found(Target),
    Stopped(ReasonCode),
    Missing,
}

/// State of one reference's resolution.
#[derive(Debug, Default)]
struct Walk {
    /// (alias name, declaring file, offset) of every followed alias.
    visited: HashSet<(String, PathBuf, usize)>,
    /// (class, member) pairs already searched.
    searched: HashSet<(UnitId, String)>,
    hops: usize,
    /// Id of the last symbol an alias pointed at.
    last: Option<UnitId>,
    /// A star import was crossed, so the match is by name only.
    via_star: bool,
}

/// Resolves references against a [`SymbolSource`].
pub struct Resolver<'a, S: SymbolSource + ?Sized> {
    symbols: &'a S,
    max_depth: usize,
}

impl<'a, S: SymbolSource + ?Sized> Resolver<'a, S> {
    pub fn new(symbols: &'a S) -> Self {
        Resolver { symbols, max_depth: DEFAULT_MAX_DEPTH }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve one reference made in `file`. Never fails: problems are
    /// reported through the confidence and reason of the result.
    pub fn resolve(&self, file: &Path, reference: &RawReference) -> Resolution {
        let Some(symbols) = self.symbols.file_symbols(file) else {
            return Resolution::unresolved(ReasonCode::NoSymbol);
        };
        let mut walk = Walk::default();
        let resolution = match &reference.shape {
            ReferenceShape::Dynamic { construct } => {
                trace!("{}:{} dynamic {}", file.display(), reference.position.line, construct);
                Resolution::unresolved(ReasonCode::UnsupportedReferenceShape)
            }
            ReferenceShape::Binding { index } => match symbols.bindings.get(*index) {
                Some(binding) => {
                    let step = self.follow(&symbols, binding, &mut walk);
                    self.finish(step, &walk, &reference.text)
                }
                None => Resolution::unresolved(ReasonCode::NoSymbol),
            },
            ReferenceShape::Name => {
                let step = self.lookup_path(&symbols, &reference.from, &reference.text, &mut walk);
                match step {
                    Step::Missing => Resolution::inferred(reference.text.as_str()).with_reason(ReasonCode::NoSymbol),
                    step => self.finish(step, &walk, &reference.text),
                }
            }
            ReferenceShape::Member { receiver, member, receiver_type } => {
                self.resolve_member(&symbols, &reference.from, receiver, member, receiver_type.as_ref(), &mut walk)
            }
        };
        trace!(
            "{} -> {:?} ({}, {} hops)",
            reference.text,
            resolution.target,
            resolution.confidence,
            walk.hops
        );
        resolution
    }

    fn resolve_member(
        &self,
        symbols: &FileSymbols,
        from: &UnitId,
        receiver: &str,
        member: &str,
        receiver_type: Option<&ReceiverType>,
        walk: &mut Walk,
    ) -> Resolution {
        match self.lookup_path(symbols, from, receiver, walk) {
            Step::Found(target) => match self.member_of(&target, member, walk, 0) {
                Step::Missing => {
                    if let Target::Module { id, .. } = &target {
                        return Resolution::inferred(id.child(member)).with_reason(ReasonCode::NoDeclarations);
                    }
                }
                step => return self.finish(step, walk, member),
            },
            Step::Stopped(reason) => return self.finish(Step::Stopped(reason), walk, member),
            Step::Missing => {}
        }

        let Some(hint) = receiver_type else {
            return Resolution::inferred(member).with_reason(ReasonCode::NoSymbol);
        };
        let class = match hint {
            ReceiverType::Unit(id) => {
                let file = self.symbols.class_file(id).unwrap_or_else(|| symbols.path.clone());
                Some(Target::Unit { file, id: id.clone() })
            }
            ReceiverType::Named(name) => match self.lookup_path(symbols, from, name, walk) {
                Step::Found(target) => Some(target),
                _ => None,
            },
        };
        if let Some(class) = class {
            if let step @ Step::Found(_) = self.member_of(&class, member, walk, 0) {
                return self.finish(step, walk, member);
            }
        }
        let type_name = match hint {
            ReceiverType::Unit(id) => id.to_string(),
            ReceiverType::Named(name) => name.clone(),
        };
        Resolution::inferred(format!("{}.{}", type_name, member)).with_reason(ReasonCode::NoSymbol)
    }

    fn finish(&self, step: Step, walk: &Walk, fallback: &str) -> Resolution {
        match step {
            Step::Found(target) => self.classify(target, walk.via_star),
            Step::Stopped(ReasonCode::FileNotFound) => Resolution::unresolved(ReasonCode::FileNotFound),
            Step::Stopped(reason) => {
                Resolution::inferred(walk.last.clone().unwrap_or_else(|| UnitId::new(fallback))).with_reason(reason)
            }
            Step::Missing => Resolution::inferred(walk.last.clone().unwrap_or_else(|| UnitId::new(fallback)))
                .with_reason(ReasonCode::NoDeclarations),
        }
    }

    /// Map a reached symbol onto the project boundary.
    fn classify(&self, target: Target, via_star: bool) -> Resolution {
        let resolution = match target {
            Target::External(id) => Resolution::external(id),
            Target::Unit { file, id } => match self.symbols.origin(&file) {
                Origin::Vendored { package } => Resolution::external(format!("{}.{}", package, id.local_name())),
                Origin::Project if is_declaration_file(&file) && !self.symbols.has_implementation(&file) => {
                    Resolution::external(id)
                }
                Origin::Project => Resolution::resolved(id),
            },
            Target::Module { file, id } => match self.symbols.origin(&file) {
                Origin::Vendored { package } => Resolution::external(package),
                Origin::Project => Resolution::resolved(id),
            },
        };
        if via_star && resolution.confidence == Confidence::Resolved {
            Resolution { confidence: Confidence::Inferred, ..resolution }
        } else {
            resolution
        }
    }

    /// Look up a possibly dotted name from inside `from`.
    fn lookup_path(&self, symbols: &FileSymbols, from: &UnitId, path: &str, walk: &mut Walk) -> Step {
        let whole = self.lookup_scoped(symbols, from, path, walk);
        if !matches!(whole, Step::Missing) || !path.contains('.') {
            return match whole {
                Step::Missing => self.builtin(symbols.language, path),
                step => step,
            };
        }

        let mut parts = path.split('.');
        let first = parts.next().unwrap_or(path);
        let mut step = match self.lookup_scoped(symbols, from, first, walk) {
            Step::Missing => self.builtin(symbols.language, first),
            step => step,
        };
        for part in parts {
            step = match step {
                Step::Found(target) => self.member_of(&target, part, walk, 0),
                other => return other,
            };
        }
        step
    }

    fn builtin(&self, language: Language, name: &str) -> Step {
        match builtin_id(language, name) {
            Some(id) => Step::Found(Target::External(UnitId::new(id))),
            None => Step::Missing,
        }
    }

    /// Declarations along the scope chain, then bindings visible in the file.
    fn lookup_scoped(&self, symbols: &FileSymbols, from: &UnitId, name: &str, walk: &mut Walk) -> Step {
        for scope in scope_chain(symbols, from) {
            // Class bodies are not enclosing scopes for their methods.
            if scope != *from && symbols.is_class(scope.as_str()) {
                continue;
            }
            if let Some(decl) = pick(symbols.declarations_in(scope.as_str(), name)) {
                return Step::Found(Target::Unit { file: symbols.path.clone(), id: declaration_id(decl) });
            }
        }
        if let Some(binding) = symbols.scope_binding(name) {
            return self.follow(symbols, binding, walk);
        }
        self.lookup_star(symbols, name, false, walk)
    }

    /// Names a module makes visible to importers.
    fn lookup_export(&self, symbols: &FileSymbols, name: &str, walk: &mut Walk) -> Step {
        let visible = symbols
            .declarations_in(symbols.module_id.as_str(), name)
            .filter(|d| !symbols.explicit_exports || d.exported);
        if let Some(decl) = pick(visible) {
            return Step::Found(Target::Unit { file: symbols.path.clone(), id: declaration_id(decl) });
        }
        if let Some(binding) = symbols.export_binding(name) {
            return self.follow(symbols, binding, walk);
        }
        if symbols.language == Language::Python {
            if let Some(binding) = symbols.scope_binding(name) {
                return self.follow(symbols, binding, walk);
            }
        }
        self.lookup_star(symbols, name, symbols.language.is_ecmascript(), walk)
    }

    fn lookup_default(&self, symbols: &FileSymbols, walk: &mut Walk) -> Step {
        let defaults = symbols
            .declarations
            .iter()
            .filter(|d| d.default_export && d.scope.as_str() == symbols.module_id);
        if let Some(decl) = pick(defaults) {
            return Step::Found(Target::Unit { file: symbols.path.clone(), id: declaration_id(decl) });
        }
        match symbols.export_binding("default") {
            Some(binding) => self.follow(symbols, binding, walk),
            None => Step::Missing,
        }
    }

    fn lookup_star(&self, symbols: &FileSymbols, name: &str, exported: bool, walk: &mut Walk) -> Step {
        let mut stopped = None;
        for binding in symbols.star_bindings(exported) {
            match self.follow_star(symbols, binding, name, walk) {
                Step::Found(target) => {
                    walk.via_star = true;
                    return Step::Found(target);
                }
                Step::Stopped(reason) => stopped = stopped.or(Some(reason)),
                Step::Missing => {}
            }
        }
        stopped.map_or(Step::Missing, Step::Stopped)
    }

    /// Count one hop and detect revisits.
    fn enter(&self, key: (String, PathBuf, usize), walk: &mut Walk) -> Option<ReasonCode> {
        if !walk.visited.insert(key) {
            return Some(ReasonCode::AliasCycle);
        }
        walk.hops += 1;
        if walk.hops > self.max_depth {
            return Some(ReasonCode::AliasDepthExceeded);
        }
        None
    }

    /// Follow one import, re-export or export-list binding declared in `symbols`.
    fn follow(&self, symbols: &FileSymbols, binding: &Binding, walk: &mut Walk) -> Step {
        let key = (binding.local.clone(), symbols.path.clone(), binding.position.offset);
        if let Some(reason) = self.enter(key, walk) {
            return Step::Stopped(reason);
        }

        let Some(specifier) = &binding.module else {
            // `export { impl as name }` points back into the same file.
            let ImportedName::Named(name) = &binding.imported else {
                return Step::Missing;
            };
            let module = UnitId::new(symbols.module_id.clone());
            walk.last = Some(module.child(name));
            return self.lookup_scoped(symbols, &module, name, walk);
        };

        match self.symbols.resolve_module(specifier, &symbols.path) {
            ModuleLookup::Missing => Step::Stopped(ReasonCode::FileNotFound),
            ModuleLookup::External { package } => {
                Step::Found(Target::External(external_id(&package, &binding.imported)))
            }
            ModuleLookup::Project(path) => {
                let Some(target) = self.symbols.file_symbols(&path) else {
                    return Step::Stopped(ReasonCode::FileNotFound);
                };
                let module = UnitId::new(target.module_id.clone());
                match &binding.imported {
                    ImportedName::Namespace | ImportedName::All => {
                        Step::Found(Target::Module { file: path, id: module })
                    }
                    ImportedName::Default => {
                        walk.last = Some(module.child("default"));
                        self.lookup_default(&target, walk)
                    }
                    ImportedName::Named(name) => {
                        walk.last = Some(module.child(name));
                        match self.lookup_export(&target, name, walk) {
                            Step::Missing if target.language == Language::Python => {
                                self.python_submodule(symbols, specifier, name)
                            }
                            step => step,
                        }
                    }
                }
            }
        }
    }

    fn follow_star(&self, symbols: &FileSymbols, binding: &Binding, name: &str, walk: &mut Walk) -> Step {
        let key = (format!("*{}", name), symbols.path.clone(), binding.position.offset);
        if let Some(reason) = self.enter(key, walk) {
            return Step::Stopped(reason);
        }
        let Some(specifier) = &binding.module else {
            return Step::Missing;
        };
        match self.symbols.resolve_module(specifier, &symbols.path) {
            ModuleLookup::Project(path) => match self.symbols.file_symbols(&path) {
                Some(target) => self.lookup_export(&target, name, walk),
                None => Step::Missing,
            },
            ModuleLookup::External { .. } | ModuleLookup::Missing => Step::Missing,
        }
    }

    /// `from pkg import mod` where `mod` is a submodule rather than a name in `pkg`.
    fn python_submodule(&self, symbols: &FileSymbols, specifier: &str, name: &str) -> Step {
        let submodule = if specifier.ends_with('.') {
            format!("{}{}", specifier, name)
        } else {
            format!("{}.{}", specifier, name)
        };
        match self.symbols.resolve_module(&submodule, &symbols.path) {
            ModuleLookup::Project(path) => match self.symbols.file_symbols(&path) {
                Some(module) => Step::Found(Target::Module { id: UnitId::new(module.module_id.clone()), file: path }),
                None => Step::Missing,
            },
            _ => Step::Missing,
        }
    }

    /// `target.name`: module export, class member, or a deeper external id.
    fn member_of(&self, target: &Target, name: &str, walk: &mut Walk, depth: usize) -> Step {
        match target {
            Target::External(id) => Step::Found(Target::External(id.child(name))),
            Target::Module { file, id } => {
                let Some(symbols) = self.symbols.file_symbols(file) else {
                    return Step::Missing;
                };
                match self.lookup_export(&symbols, name, walk) {
                    Step::Missing if symbols.language == Language::Python => {
                        self.python_submodule(&symbols, id.as_str(), name)
                    }
                    step => step,
                }
            }
            Target::Unit { id, .. } => self.class_member(id, name, walk, depth),
        }
    }

    /// Structural member lookup through the class and its bases.
    fn class_member(&self, class: &UnitId, name: &str, walk: &mut Walk, depth: usize) -> Step {
        if depth > self.max_depth {
            return Step::Stopped(ReasonCode::AliasDepthExceeded);
        }
        if !walk.searched.insert((class.clone(), name.to_string())) {
            return Step::Missing;
        }
        let Some(file) = self.symbols.class_file(class) else {
            return Step::Missing;
        };
        let Some(symbols) = self.symbols.file_symbols(&file) else {
            return Step::Missing;
        };
        let Some(info) = symbols.classes.get(class) else {
            return Step::Missing;
        };
        if let Some(member) = info.members.get(name) {
            return Step::Found(Target::Unit { file, id: member.clone() });
        }

        let scope = class.parent().unwrap_or_else(|| UnitId::new(symbols.module_id.clone()));
        for base in &info.bases {
            match self.lookup_path(&symbols, &scope, base, walk) {
                Step::Found(Target::Unit { id, .. }) => match self.class_member(&id, name, walk, depth + 1) {
                    Step::Missing => continue,
                    step => return step,
                },
                Step::Found(Target::External(id)) => return Step::Found(Target::External(id.child(name))),
                _ => continue,
            }
        }
        Step::Missing
    }
}

/// `from` and its enclosing containers, innermost first, ending at the module.
fn scope_chain(symbols: &FileSymbols, from: &UnitId) -> Vec<UnitId> {
    let module = UnitId::new(symbols.module_id.clone());
    let prefix = format!("{}.", module);
    let mut chain = Vec::new();
    let mut current = Some(from.clone());
    while let Some(scope) = current {
        if scope == module {
            break;
        }
        if !scope.as_str().starts_with(&prefix) {
            break;
        }
        current = scope.parent();
        chain.push(scope);
    }
    chain.push(module);
    chain
}

/// Prefer the last declaration that created a unit (later definitions shadow earlier ones).
fn pick<'d>(declarations: impl Iterator<Item = &'d Declaration>) -> Option<&'d Declaration> {
    let mut fallback = None;
    let mut with_unit = None;
    for decl in declarations {
        if decl.unit.is_some() {
            with_unit = Some(decl);
        }
        fallback = Some(decl);
    }
    with_unit.or(fallback)
}

fn declaration_id(decl: &Declaration) -> UnitId {
    decl.unit.clone().unwrap_or_else(|| decl.scope.child(&decl.name))
}

fn external_id(package: &str, imported: &ImportedName) -> UnitId {
    match imported {
        ImportedName::Named(name) => UnitId::new(format!("{}.{}", package, name)),
        ImportedName::Default => UnitId::new(format!("{}.default", package)),
        ImportedName::Namespace | ImportedName::All => UnitId::new(package),
    }
}
