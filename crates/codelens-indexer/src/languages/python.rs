//! Python adapter using tree-sitter

use codelens_core::parse::{Binding, ImportedName, ReceiverType, ReferenceShape};
use codelens_core::{EdgeKind, ParseOutput, SourceFile, UnitId, UnitKind};
use tree_sitter::Node;

use super::{Emitter, Scope, ScopeStack, Span, collapse_whitespace, is_name_path, named_children, position, strip_generics, summary_line, text};
use crate::adapter::{FragmentDefinition, FragmentInfo, Param, ParserAdapter, dedent};
use crate::error::IndexError;
use crate::parser_pool::{Grammar, ParseRequest, ParserPool};

/// Calls whose target is computed at runtime.
const DYNAMIC_CALLS: &[&str] = &["getattr", "setattr", "delattr", "eval", "exec", "compile", "globals", "locals", "vars", "__import__"];

const DYNAMIC_MEMBERS: &[&str] = &["importlib.import_module"];

const SELF_NAMES: &[&str] = &["self", "cls"];

pub struct PythonAdapter {
    parser_pool: ParserPool,
}

impl PythonAdapter {
    pub fn new(parser_pool: ParserPool) -> Self {
        Self { parser_pool }
    }

    fn parse_tree(&self, file: &SourceFile) -> Result<tree_sitter::Tree, IndexError> {
        let request = ParseRequest { grammar: Grammar::Python, content: file.content.clone(), path: file.path.clone() };
        Ok(self.parser_pool.parse_blocking(request)?.tree)
    }
}

impl ParserAdapter for PythonAdapter {
    fn name(&self) -> &str {
        "python"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn parse(&self, file: &SourceFile) -> Result<ParseOutput, IndexError> {
        let tree = self.parse_tree(file)?;
        let root = tree.root_node();
        let mut walker = PythonWalker::new(file);
        walker.walk_module(root);
        Ok(walker.em.finish(root))
    }

    fn inspect_fragment(&self, source: &str, expected: UnitKind) -> Result<FragmentInfo, IndexError> {
        let fragment = SourceFile::new("fragment.py", "fragment", dedent(source));
        let tree = self.parse_tree(&fragment)?;
        let root = tree.root_node();
        let src = fragment.content.as_bytes();

        let mut info = FragmentInfo { diagnostics: super::collect_diagnostics(root, src), ..Default::default() };
        for child in named_children(root) {
            if child.kind() == "comment" {
                continue;
            }
            info.statements += 1;
            let def = match child.kind() {
                "decorated_definition" => child.child_by_field_name("definition"),
                "function_definition" | "class_definition" => Some(child),
                _ => None,
            };
            let Some(def) = def else { continue };
            let name = def.child_by_field_name("name").map(|n| text(n, src)).unwrap_or_default();
            let (kind, params) = match def.kind() {
                "class_definition" => (UnitKind::Class, Vec::new()),
                _ => {
                    let kind = if expected == UnitKind::Method { UnitKind::Method } else { UnitKind::Function };
                    let params = def.child_by_field_name("parameters").map(|p| parameters(p, src)).unwrap_or_default();
                    (kind, params)
                }
            };
            info.definitions.push(FragmentDefinition { kind, name: name.to_string(), params });
        }
        Ok(info)
    }
}

/// Parameters of a `parameters` node.
fn parameters(node: Node<'_>, src: &[u8]) -> Vec<Param> {
    let mut params = Vec::new();
    for child in named_children(node) {
        let param = match child.kind() {
            "identifier" => Param { name: text(child, src).to_string(), required: true, variadic: false },
            "typed_parameter" => {
                let inner = child.named_child(0);
                let variadic = inner.is_some_and(|n| n.kind().ends_with("splat_pattern"));
                let name = inner.map(|n| text(n, src)).unwrap_or_default().trim_start_matches('*');
                Param { name: name.to_string(), required: !variadic, variadic }
            }
            "default_parameter" | "typed_default_parameter" => {
                let name = child.child_by_field_name("name").map(|n| text(n, src)).unwrap_or_default();
                Param { name: name.to_string(), required: false, variadic: false }
            }
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                Param { name: text(child, src).trim_start_matches('*').to_string(), required: false, variadic: true }
            }
            _ => continue,
        };
        params.push(param);
    }
    params
}

/// `"""Doc."""` as the first statement of a body.
fn docstring(body: Node<'_>, src: &[u8]) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = text(string, src).trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B']);
    let inner = raw.trim_matches('"').trim_matches('\'');
    summary_line(inner)
}

/// Annotation text usable as a receiver type.
fn annotation(node: Node<'_>, src: &[u8]) -> Option<String> {
    let name = strip_generics(text(node, src));
    is_name_path(name).then(|| name.to_string())
}

struct PythonWalker<'a> {
    em: Emitter<'a>,
    scopes: ScopeStack,
}

impl<'a> PythonWalker<'a> {
    fn new(file: &'a SourceFile) -> Self {
        let em = Emitter::new(file);
        let scopes = ScopeStack::new(em.module.clone());
        PythonWalker { em, scopes }
    }

    fn walk_module(&mut self, root: Node<'_>) {
        let doc = docstring(root, self.em.src);
        self.em.module_unit(doc);

        let mut pending: Vec<Node<'_>> = Vec::new();
        for (i, child) in named_children(root).into_iter().enumerate() {
            match child.kind() {
                "function_definition" | "class_definition" | "decorated_definition" => {
                    self.flush_block(&mut pending);
                    self.definition(child);
                }
                "import_statement" | "import_from_statement" | "future_import_statement" => {
                    self.flush_block(&mut pending);
                    self.import(child);
                }
                "comment" => {}
                "expression_statement" if i == 0 && child.named_child(0).is_some_and(|n| n.kind() == "string") => {}
                _ => pending.push(child),
            }
        }
        self.flush_block(&mut pending);
    }

    /// Contiguous module-level statements become one block unit.
    fn flush_block(&mut self, pending: &mut Vec<Node<'_>>) {
        let (Some(first), Some(last)) = (pending.first().copied(), pending.last().copied()) else {
            return;
        };
        let module = self.em.module.clone();
        let id = module.child(&format!("_block_{}", first.start_position().row + 1));
        self.em.unit(id.clone(), UnitKind::Block, module.clone(), Span::between(first, last), None, None, &[]);

        self.scopes.push(Scope::new(id, module, UnitKind::Block, None));
        for stmt in pending.drain(..) {
            self.visit(stmt);
        }
        self.scopes.pop();
    }

    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "function_definition" | "class_definition" | "decorated_definition" => self.definition(node),
            "import_statement" | "import_from_statement" => self.import(node),
            "call" => self.call(node),
            "assignment" => self.assignment(node),
            "for_statement" | "for_in_clause" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_targets(left);
                }
                for child in named_children(node) {
                    self.visit(child);
                }
            }
            _ => {
                for child in named_children(node) {
                    self.visit(child);
                }
            }
        }
    }

    fn definition(&mut self, node: Node<'_>) {
        let (def, decorators) = if node.kind() == "decorated_definition" {
            let decorators: Vec<Node<'_>> = named_children(node).into_iter().filter(|n| n.kind() == "decorator").collect();
            match node.child_by_field_name("definition") {
                Some(def) => (def, decorators),
                None => return,
            }
        } else {
            (node, Vec::new())
        };
        match def.kind() {
            "function_definition" => self.function(def, &decorators),
            "class_definition" => self.class(def, &decorators),
            _ => {}
        }
    }

    /// `def name(params) -> T` without the trailing colon.
    fn header(&self, def: Node<'_>) -> Option<String> {
        let body = def.child_by_field_name("body")?;
        let head = self.em.src.get(def.start_byte()..body.start_byte())?;
        let head = std::str::from_utf8(head).ok()?.trim_end().trim_end_matches(':');
        Some(collapse_whitespace(head))
    }

    fn function(&mut self, def: Node<'_>, decorators: &[Node<'_>]) {
        let Some(name_node) = def.child_by_field_name("name") else { return };
        let name = self.em.text(name_node);
        let parent = self.scopes.current().clone();
        let kind = if parent.kind == UnitKind::Class { UnitKind::Method } else { UnitKind::Function };
        let id = parent.container.child(name);
        let doc = def.child_by_field_name("body").and_then(|b| docstring(b, self.em.src));
        let is_async = self.em.text(def).starts_with("async");
        let extra: &[(&str, &str)] = if is_async { &[("async", "true")] } else { &[] };
        let signature = self.header(def);

        self.em.unit(id.clone(), kind, parent.container.clone(), Span::of(def), signature, doc, extra);
        self.em.declare(name, &parent.container, Some(id.clone()), false, false, name_node);
        for decorator in decorators {
            self.decorator(&id, *decorator);
        }

        let mut scope = Scope::new(id.clone(), id, kind, parent.class.clone());
        if let Some(params) = def.child_by_field_name("parameters") {
            for param in named_children(params) {
                self.parameter(param, &mut scope);
            }
        }
        self.scopes.push(scope);
        if let Some(body) = def.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    fn parameter(&self, param: Node<'_>, scope: &mut Scope) {
        let src = self.em.src;
        let (name, annotated) = match param.kind() {
            "identifier" => (text(param, src), None),
            "typed_parameter" => (
                param.named_child(0).map(|n| text(n, src)).unwrap_or_default(),
                param.child_by_field_name("type"),
            ),
            "default_parameter" | "typed_default_parameter" => (
                param.child_by_field_name("name").map(|n| text(n, src)).unwrap_or_default(),
                param.child_by_field_name("type"),
            ),
            "list_splat_pattern" | "dictionary_splat_pattern" => (text(param, src), None),
            _ => return,
        };
        let name = name.trim_start_matches('*');
        if name.is_empty() {
            return;
        }
        scope.locals.insert(name.to_string());
        if let Some(ty) = annotated.and_then(|t| annotation(t, src)) {
            scope.hints.insert(name.to_string(), ReceiverType::Named(ty));
        }
    }

    fn class(&mut self, def: Node<'_>, decorators: &[Node<'_>]) {
        let Some(name_node) = def.child_by_field_name("name") else { return };
        let name = self.em.text(name_node);
        let parent = self.scopes.current().clone();
        let id = parent.container.child(name);
        let doc = def.child_by_field_name("body").and_then(|b| docstring(b, self.em.src));
        let signature = self.header(def);

        self.em.unit(id.clone(), UnitKind::Class, parent.container.clone(), Span::of(def), signature, doc, &[]);
        self.em.declare(name, &parent.container, Some(id.clone()), false, false, name_node);

        let mut bases = Vec::new();
        if let Some(superclasses) = def.child_by_field_name("superclasses") {
            for base in named_children(superclasses) {
                let written = match base.kind() {
                    "identifier" | "attribute" => self.em.text(base),
                    "subscript" => base.child_by_field_name("value").map(|v| self.em.text(v)).unwrap_or_default(),
                    _ => continue,
                };
                if !is_name_path(written) {
                    continue;
                }
                let shape = self.em.path_shape(written, &self.scopes, SELF_NAMES);
                self.em.reference(&id, EdgeKind::Inherits, written, shape, base);
                bases.push(written.to_string());
            }
        }
        self.em.class_bases(id.clone(), bases);
        for decorator in decorators {
            self.decorator(&id, *decorator);
        }

        self.scopes.push(Scope::new(id.clone(), id.clone(), UnitKind::Class, Some(id)));
        if let Some(body) = def.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    /// `@name`, `@pkg.name` and `@name(args)`.
    fn decorator(&mut self, target: &UnitId, decorator: Node<'_>) {
        let Some(mut expr) = decorator.named_child(0) else { return };
        if expr.kind() == "call" {
            match expr.child_by_field_name("function") {
                Some(function) => expr = function,
                None => return,
            }
        }
        let written = self.em.text(expr);
        if !is_name_path(written) {
            return;
        }
        let shape = self.em.path_shape(written, &self.scopes, SELF_NAMES);
        self.em.reference(target, EdgeKind::Decorates, written, shape, expr);
    }

    fn import(&mut self, node: Node<'_>) {
        let from = self.scopes.current().unit.clone();
        let src = self.em.src;
        match node.kind() {
            "import_statement" => {
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    match name.kind() {
                        "dotted_name" => {
                            let module = text(name, src);
                            self.bind(&from, module, module, ImportedName::Namespace, name);
                            // `import a.b` also binds `a`.
                            if let Some((top, _)) = module.split_once('.') {
                                self.bind(&from, top, top, ImportedName::Namespace, name);
                            }
                        }
                        "aliased_import" => {
                            let module = name.child_by_field_name("name").map(|n| text(n, src)).unwrap_or_default();
                            let alias = name.child_by_field_name("alias").map(|n| text(n, src)).unwrap_or_default();
                            self.bind(&from, alias, module, ImportedName::Namespace, name);
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" => {
                let Some(module_node) = node.child_by_field_name("module_name") else { return };
                let module = text(module_node, src);
                if named_children(node).iter().any(|n| n.kind() == "wildcard_import") {
                    self.bind(&from, "*", module, ImportedName::All, node);
                    return;
                }
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    let (imported, local) = match name.kind() {
                        "aliased_import" => (
                            name.child_by_field_name("name").map(|n| text(n, src)).unwrap_or_default(),
                            name.child_by_field_name("alias").map(|n| text(n, src)).unwrap_or_default(),
                        ),
                        _ => (text(name, src), text(name, src)),
                    };
                    self.bind(&from, local, module, ImportedName::Named(imported.to_string()), name);
                }
            }
            _ => {}
        }
    }

    fn bind(&mut self, from: &UnitId, local: &str, module: &str, imported: ImportedName, node: Node<'_>) {
        if local.is_empty() || module.is_empty() {
            return;
        }
        self.em.bind(
            from,
            Binding {
                local: local.to_string(),
                module: Some(module.to_string()),
                imported,
                exported: false,
                in_scope: true,
                position: position(node),
            },
        );
    }

    fn call(&mut self, node: Node<'_>) {
        let from = self.scopes.current().unit.clone();
        if let Some(function) = node.child_by_field_name("function") {
            let written = self.em.text(function);
            match function.kind() {
                "identifier" if DYNAMIC_CALLS.contains(&written) => {
                    let shape = ReferenceShape::Dynamic { construct: written.to_string() };
                    self.em.reference(&from, EdgeKind::Calls, written, shape, function);
                }
                "identifier" => self.em.reference(&from, EdgeKind::Calls, written, ReferenceShape::Name, function),
                "attribute" if DYNAMIC_MEMBERS.contains(&written) => {
                    let shape = ReferenceShape::Dynamic { construct: written.to_string() };
                    self.em.reference(&from, EdgeKind::Calls, written, shape, function);
                }
                "attribute" if is_name_path(written) => {
                    let shape = self.em.path_shape(written, &self.scopes, SELF_NAMES);
                    self.em.reference(&from, EdgeKind::Calls, written, shape, function);
                }
                "attribute" => {
                    // Receiver is an expression such as `make().run()`.
                    let member = function.child_by_field_name("attribute").map(|n| self.em.text(n)).unwrap_or_default();
                    if let Some(object) = function.child_by_field_name("object") {
                        let shape = ReferenceShape::Member {
                            receiver: self.em.text(object).to_string(),
                            member: member.to_string(),
                            receiver_type: None,
                        };
                        self.em.reference(&from, EdgeKind::Calls, member, shape, function);
                        self.visit(object);
                    }
                }
                "subscript" => {
                    let shape = ReferenceShape::Dynamic { construct: "subscript".to_string() };
                    self.em.reference(&from, EdgeKind::Calls, written, shape, function);
                    self.visit(function);
                }
                _ => self.visit(function),
            }
        }
        if let Some(arguments) = node.child_by_field_name("arguments") {
            for arg in named_children(arguments) {
                let value = match arg.kind() {
                    "keyword_argument" => arg.child_by_field_name("value"),
                    _ => Some(arg),
                };
                if let Some(value) = value.filter(|v| v.kind() == "identifier") {
                    self.callback(&from, value);
                }
                self.visit(arg);
            }
        }
    }

    /// A function or class passed by name, e.g. `register(handler)`.
    fn callback(&mut self, from: &UnitId, node: Node<'_>) {
        let name = self.em.text(node);
        if self.scopes.is_local(name) || SELF_NAMES.contains(&name) {
            return;
        }
        self.em.reference(from, EdgeKind::References, name, ReferenceShape::Name, node);
    }

    fn assignment(&mut self, node: Node<'_>) {
        let left = node.child_by_field_name("left");
        let right = node.child_by_field_name("right");
        if let Some(left) = left {
            if left.kind() == "identifier" {
                let name = self.em.text(left);
                self.bind_targets(left);
                let hint = node
                    .child_by_field_name("type")
                    .and_then(|t| annotation(t, self.em.src))
                    .or_else(|| right.and_then(|r| self.constructed_type(r)));
                if let Some(hint) = hint {
                    self.scopes.add_hint(name, ReceiverType::Named(hint));
                }
            } else if matches!(left.kind(), "pattern_list" | "tuple_pattern" | "list_pattern") {
                self.bind_targets(left);
            }
        }
        if let Some(right) = right {
            self.visit(right);
        }
    }

    /// Names bound by an assignment or loop target.
    fn bind_targets(&mut self, target: Node<'_>) {
        match target.kind() {
            "identifier" => {
                let name = self.em.text(target);
                if self.scopes.in_function() {
                    self.scopes.add_local(name);
                } else {
                    let scope = self.scopes.current().container.clone();
                    self.em.declare(name, &scope, None, false, false, target);
                }
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" => {
                for child in named_children(target) {
                    self.bind_targets(child);
                }
            }
            _ => {}
        }
    }

    /// `Foo(...)` / `models.Foo(...)` with a capitalized callee.
    fn constructed_type(&self, value: Node<'_>) -> Option<String> {
        if value.kind() != "call" {
            return None;
        }
        let callee = self.em.text(value.child_by_field_name("function")?);
        let last = callee.rsplit('.').next()?;
        (is_name_path(callee) && last.starts_with(|c: char| c.is_uppercase())).then(|| callee.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::create_parser_pool;

    fn parse(path: &str, module: &str, content: &str) -> ParseOutput {
        let adapter = PythonAdapter::new(create_parser_pool());
        adapter.parse(&SourceFile::new(path, module, content)).unwrap()
    }

    #[test]
    fn test_units_and_ids() {
        let out = parse(
            "pkg/service.py",
            "pkg.service",
            "\"\"\"Service layer.\"\"\"\nclass Service:\n    def run(self, job):\n        \"\"\"Run a job.\"\"\"\n        return self.prepare(job)\n\n    def prepare(self, job):\n        return job\n\ndef helper():\n    pass\n",
        );
        let ids: Vec<&str> = out.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["pkg.service", "pkg.service.Service", "pkg.service.Service.run", "pkg.service.Service.prepare", "pkg.service.helper"]);

        let run = &out.units[2];
        assert_eq!(run.kind, UnitKind::Method);
        assert_eq!(run.signature.as_deref(), Some("def run(self, job)"));
        assert_eq!(run.doc_summary.as_deref(), Some("Run a job."));
        assert_eq!(run.location.start_line, 3);
        assert_eq!(run.location.end_line, 5);
        assert_eq!(out.units[0].doc_summary.as_deref(), Some("Service layer."));

        let self_call = out.references.iter().find(|r| r.text == "self.prepare").unwrap();
        assert_eq!(self_call.from.as_str(), "pkg.service.Service.run");
        assert_eq!(
            self_call.shape,
            ReferenceShape::Member {
                receiver: "self".into(),
                member: "prepare".into(),
                receiver_type: Some(ReceiverType::Unit(UnitId::new("pkg.service.Service"))),
            }
        );
    }

    #[test]
    fn test_reparse_is_deterministic() {
        let content = "def f(x):\n    return g(x)\n\ndef g(y):\n    return y\n";
        let a = parse("m.py", "m", content);
        let b = parse("m.py", "m", content);
        assert_eq!(a.units, b.units);
        assert_eq!(a.references, b.references);
    }

    #[test]
    fn test_imports_become_bindings() {
        let out = parse(
            "app.py",
            "app",
            "import os.path\nimport numpy as np\nfrom .models import User as U, Group\nfrom helpers import *\n",
        );
        let locals: Vec<(&str, Option<&str>, &ImportedName)> =
            out.bindings.iter().map(|b| (b.local.as_str(), b.module.as_deref(), &b.imported)).collect();
        assert_eq!(
            locals,
            vec![
                ("os.path", Some("os.path"), &ImportedName::Namespace),
                ("os", Some("os"), &ImportedName::Namespace),
                ("np", Some("numpy"), &ImportedName::Namespace),
                ("U", Some(".models"), &ImportedName::Named("User".into())),
                ("Group", Some(".models"), &ImportedName::Named("Group".into())),
                ("*", Some("helpers"), &ImportedName::All),
            ]
        );
        assert!(out.bindings.iter().all(|b| b.in_scope && !b.exported));
        let imports = out.references.iter().filter(|r| r.kind == EdgeKind::Imports).count();
        assert_eq!(imports, 6);
    }

    #[test]
    fn test_dynamic_calls_are_flagged() {
        let out = parse(
            "dyn.py",
            "dyn",
            "def f(obj, name, table):\n    getattr(obj, name)()\n    table[name]()\n    eval('x')\n",
        );
        let dynamic: Vec<&str> = out
            .references
            .iter()
            .filter_map(|r| match &r.shape {
                ReferenceShape::Dynamic { construct } => Some(construct.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(dynamic, vec!["getattr", "subscript", "eval"]);
    }

    #[test]
    fn test_receiver_hints() {
        let out = parse(
            "svc.py",
            "svc",
            "from repo import Repo\n\ndef save(user, store: Store):\n    r = Repo()\n    r.put(user)\n    store.flush()\n",
        );
        let put = out.references.iter().find(|r| r.text == "r.put").unwrap();
        assert!(matches!(&put.shape, ReferenceShape::Member { receiver_type: Some(ReceiverType::Named(t)), .. } if t == "Repo"));
        let flush = out.references.iter().find(|r| r.text == "store.flush").unwrap();
        assert!(matches!(&flush.shape, ReferenceShape::Member { receiver_type: Some(ReceiverType::Named(t)), .. } if t == "Store"));
        // Parameters are locals, never references.
        assert!(!out.references.iter().any(|r| r.text == "user"));
    }

    #[test]
    fn test_blocks_bases_and_decorators() {
        let out = parse(
            "main.py",
            "main",
            "import app\n\nclass Admin(base.User, Generic[T]):\n    pass\n\n@app.route('/')\ndef index():\n    pass\n\nif __name__ == '__main__':\n    index()\n",
        );
        let block = out.units.iter().find(|u| u.kind == UnitKind::Block).unwrap();
        assert_eq!(block.id.as_str(), "main._block_10");
        let call = out.references.iter().find(|r| r.text == "index" && r.kind == EdgeKind::Calls).unwrap();
        assert_eq!(call.from.as_str(), "main._block_10");

        assert_eq!(out.class_bases[&UnitId::new("main.Admin")], vec!["base.User".to_string(), "Generic".to_string()]);
        let decorates = out.references.iter().find(|r| r.kind == EdgeKind::Decorates).unwrap();
        assert_eq!(decorates.from.as_str(), "main.index");
        assert_eq!(decorates.text, "app.route");

        let index = out.units.iter().find(|u| u.id.as_str() == "main.index").unwrap();
        assert_eq!(index.location.start_line, 7);
    }

    #[test]
    fn test_malformed_input_gives_diagnostics() {
        let out = parse("bad.py", "bad", "def ok():\n    pass\n\ndef broken(:\n");
        assert!(out.has_errors());
        assert!(out.units.iter().any(|u| u.id.as_str() == "bad.ok"));
    }

    #[test]
    fn test_inspect_fragment() {
        let adapter = PythonAdapter::new(create_parser_pool());
        let info = adapter
            .inspect_fragment("    def run(self, job, retries=3, *args, **kw):\n        return job\n", UnitKind::Method)
            .unwrap();
        assert!(info.parses());
        let def = info.single_definition().unwrap();
        assert_eq!(def.kind, UnitKind::Method);
        let required: Vec<&str> = def.params.iter().filter(|p| p.required).map(|p| p.name.as_str()).collect();
        assert_eq!(required, vec!["self", "job"]);
        assert_eq!(def.params.iter().filter(|p| p.variadic).count(), 2);

        let two = adapter.inspect_fragment("def a():\n    pass\n\ndef b():\n    pass\n", UnitKind::Function).unwrap();
        assert!(two.single_definition().is_none());

        let broken = adapter.inspect_fragment("def a(:\n", UnitKind::Function).unwrap();
        assert!(!broken.parses());
    }
}
