//! Parser adapters per language, and the tree helpers they share

pub mod ecmascript;
pub mod javascript;
pub mod python;
pub mod typescript;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use codelens_core::parse::{Binding, Declaration, ParseDiagnostic, ParseOutput, Position, RawReference, ReceiverType, ReferenceShape, SourceFile};
use codelens_core::{EdgeKind, SourceLocation, SourceUnit, UnitId, UnitKind, content_hash};
use tree_sitter::Node;

use crate::adapter::ParserAdapter;
use crate::parser_pool::ParserPool;

/// Cap on diagnostics reported per file.
const MAX_DIAGNOSTICS: usize = 20;

/// All adapters, looked up by file extension.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ParserAdapter>>,
}

impl AdapterRegistry {
    pub fn new(pool: ParserPool) -> Self {
        AdapterRegistry {
            adapters: vec![
                Arc::new(python::PythonAdapter::new(pool.clone())),
                Arc::new(typescript::TypeScriptAdapter::new(pool.clone())),
                Arc::new(javascript::JavaScriptAdapter::new(pool)),
            ],
        }
    }

    /// Get the adapter for a file based on its extension
    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn ParserAdapter>> {
        let ext = path.extension()?.to_str()?;
        self.adapters
            .iter()
            .find(|a| a.supported_extensions().contains(&ext))
            .cloned()
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }
}

/// Byte and line extent of a unit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Span {
    start_byte: usize,
    end_byte: usize,
    start_line: u32,
    end_line: u32,
}

impl Span {
    pub fn of(node: Node<'_>) -> Self {
        Span::between(node, node)
    }

    pub fn between(first: Node<'_>, last: Node<'_>) -> Self {
        Span {
            start_byte: first.start_byte(),
            end_byte: last.end_byte(),
            start_line: first.start_position().row as u32 + 1,
            end_line: last.end_position().row as u32 + 1,
        }
    }
}

pub(crate) fn text<'s>(node: Node<'_>, src: &'s [u8]) -> &'s str {
    node.utf8_text(src).unwrap_or("")
}

pub(crate) fn position(node: Node<'_>) -> Position {
    Position {
        line: node.start_position().row as u32 + 1,
        column: node.start_position().column as u32,
        offset: node.start_byte(),
    }
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Source text with runs of whitespace collapsed to one space.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `Foo[int]` / `Foo<T>` → `Foo`.
pub(crate) fn strip_generics(text: &str) -> &str {
    let end = text.find(['[', '<']).unwrap_or(text.len());
    text[..end].trim()
}

/// A plain (possibly dotted) identifier path such as `a.b.C`.
pub(crate) fn is_name_path(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|part| {
            let mut chars = part.chars();
            chars.next().is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

/// First non-empty line of a doc comment or docstring body.
pub(crate) fn summary_line(doc: &str) -> Option<String> {
    doc.lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Syntax errors and missing tokens, outermost first.
pub(crate) fn collect_diagnostics(root: Node<'_>, src: &[u8]) -> Vec<ParseDiagnostic> {
    let mut diagnostics = Vec::new();
    if !root.has_error() {
        return diagnostics;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if diagnostics.len() >= MAX_DIAGNOSTICS {
            break;
        }
        if node.is_error() {
            let snippet: String = text(node, src).chars().take(40).collect();
            diagnostics.push(ParseDiagnostic {
                line: node.start_position().row as u32 + 1,
                column: node.start_position().column as u32,
                message: format!("syntax error near `{}`", snippet.trim()),
            });
            continue;
        }
        if node.is_missing() {
            diagnostics.push(ParseDiagnostic {
                line: node.start_position().row as u32 + 1,
                column: node.start_position().column as u32,
                message: format!("missing `{}`", node.kind()),
            });
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    diagnostics.sort_by_key(|d| (d.line, d.column));
    diagnostics
}

/// Lexical scope tracked while walking a file.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    /// Unit references made here are attributed to.
    pub unit: UnitId,
    /// Container new declarations belong to.
    pub container: UnitId,
    pub kind: UnitKind,
    /// Class `self` / `this` is an instance of.
    pub class: Option<UnitId>,
    pub hints: HashMap<String, ReceiverType>,
    /// Parameters and local variables; never reported as references.
    pub locals: HashSet<String>,
}

impl Scope {
    pub fn new(unit: UnitId, container: UnitId, kind: UnitKind, class: Option<UnitId>) -> Self {
        Scope { unit, container, kind, class, hints: HashMap::new(), locals: HashSet::new() }
    }

    fn is_function(&self) -> bool {
        matches!(self.kind, UnitKind::Function | UnitKind::Method)
    }
}

pub(crate) struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new(module: UnitId) -> Self {
        ScopeStack { scopes: vec![Scope::new(module.clone(), module, UnitKind::Module, None)] }
    }

    pub fn current(&self) -> &Scope {
        // The module scope is never popped.
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn in_function(&self) -> bool {
        self.current().is_function()
    }

    /// Record a local name in the innermost function scope.
    pub fn add_local(&mut self, name: &str) {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.is_function()) {
            scope.locals.insert(name.to_string());
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.locals.contains(name))
    }

    /// Blocks share the module's hints.
    pub fn add_hint(&mut self, name: &str, hint: ReceiverType) {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.kind != UnitKind::Block) {
            scope.hints.insert(name.to_string(), hint);
        }
    }

    /// Innermost hint for `name`; class bodies do not enclose their methods.
    pub fn hint(&self, name: &str) -> Option<ReceiverType> {
        let top = self.scopes.len() - 1;
        self.scopes
            .iter()
            .enumerate()
            .rev()
            .filter(|(i, s)| *i == top || s.kind != UnitKind::Class)
            .find_map(|(_, s)| s.hints.get(name).cloned())
    }

    /// Type hint for a member-access receiver.
    pub fn receiver_type(&self, receiver: &str, self_names: &[&str]) -> Option<ReceiverType> {
        if self_names.contains(&receiver) {
            return self.current().class.clone().map(ReceiverType::Unit);
        }
        self.hint(receiver)
    }
}

/// Accumulates a file's parse output.
pub(crate) struct Emitter<'a> {
    pub file: &'a SourceFile,
    pub src: &'a [u8],
    pub module: UnitId,
    output: ParseOutput,
}

impl<'a> Emitter<'a> {
    pub fn new(file: &'a SourceFile) -> Self {
        Emitter {
            file,
            src: file.content.as_bytes(),
            module: UnitId::new(file.module_id.clone()),
            output: ParseOutput::default(),
        }
    }

    pub fn text(&self, node: Node<'_>) -> &'a str {
        text(node, self.src)
    }

    pub fn module_unit(&mut self, doc: Option<String>) {
        let lines = self.file.content.lines().count().max(1) as u32;
        let span = Span { start_byte: 0, end_byte: self.src.len(), start_line: 1, end_line: lines };
        let unit = self.build(self.module.clone(), UnitKind::Module, None, span, None, doc);
        self.output.units.push(unit);
    }

    pub fn unit(
        &mut self,
        id: UnitId,
        kind: UnitKind,
        parent: UnitId,
        span: Span,
        signature: Option<String>,
        doc: Option<String>,
        extra: &[(&str, &str)],
    ) {
        let mut unit = self.build(id, kind, Some(parent), span, signature, doc);
        for (key, value) in extra {
            unit.metadata.insert(key.to_string(), value.to_string());
        }
        self.output.units.push(unit);
    }

    fn build(
        &self,
        id: UnitId,
        kind: UnitKind,
        parent: Option<UnitId>,
        span: Span,
        signature: Option<String>,
        doc: Option<String>,
    ) -> SourceUnit {
        let body = self.src.get(span.start_byte..span.end_byte).unwrap_or_default();
        let mut metadata = BTreeMap::new();
        metadata.insert("module".to_string(), self.module.to_string());
        SourceUnit {
            name: id.local_name().to_string(),
            id,
            kind,
            parent,
            language: self.file.language(),
            location: SourceLocation {
                file: self.file.path.clone(),
                start_line: span.start_line,
                end_line: span.end_line,
                start_byte: span.start_byte,
                end_byte: span.end_byte,
            },
            content_hash: content_hash(body),
            signature,
            doc_summary: doc,
            metadata,
        }
    }

    pub fn declare(&mut self, name: &str, scope: &UnitId, unit: Option<UnitId>, exported: bool, default_export: bool, node: Node<'_>) {
        self.output.declarations.push(Declaration {
            name: name.to_string(),
            scope: scope.clone(),
            unit,
            exported,
            default_export,
            position: position(node),
        });
    }

    /// Record a binding; bindings that name a module also produce an import reference.
    pub fn bind(&mut self, from: &UnitId, binding: Binding) {
        let index = self.output.bindings.len();
        if binding.module.is_some() {
            self.output.references.push(RawReference {
                from: from.clone(),
                kind: EdgeKind::Imports,
                text: binding.local.clone(),
                shape: ReferenceShape::Binding { index },
                position: binding.position,
            });
        }
        self.output.bindings.push(binding);
    }

    pub fn reference(&mut self, from: &UnitId, kind: EdgeKind, text: &str, shape: ReferenceShape, node: Node<'_>) {
        self.output.references.push(RawReference {
            from: from.clone(),
            kind,
            text: text.to_string(),
            shape,
            position: position(node),
        });
    }

    /// `a.b.c` → member `c` of receiver `a.b`, or a bare name.
    pub fn path_shape(&self, path: &str, scopes: &ScopeStack, self_names: &[&str]) -> ReferenceShape {
        match path.rsplit_once('.') {
            Some((receiver, member)) => ReferenceShape::Member {
                receiver: receiver.to_string(),
                member: member.to_string(),
                receiver_type: scopes.receiver_type(receiver, self_names),
            },
            None => ReferenceShape::Name,
        }
    }

    pub fn class_bases(&mut self, class: UnitId, bases: Vec<String>) {
        self.output.class_bases.insert(class, bases);
    }

    pub fn finish(mut self, root: Node<'_>) -> ParseOutput {
        self.output.diagnostics = collect_diagnostics(root, self.src);
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_paths() {
        assert!(is_name_path("a.b.C"));
        assert!(is_name_path("$el"));
        assert!(!is_name_path("foo()"));
        assert!(!is_name_path("a..b"));
        assert_eq!(strip_generics("Generic[T]"), "Generic");
        assert_eq!(strip_generics("Repo<User>"), "Repo");
    }

    #[test]
    fn test_summary_line() {
        assert_eq!(summary_line("\n  Validate an email.\n  More."), Some("Validate an email.".into()));
        assert_eq!(summary_line("*\n * Fetch users.\n "), Some("Fetch users.".into()));
        assert_eq!(summary_line("   "), None);
    }
}
