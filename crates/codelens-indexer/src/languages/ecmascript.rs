//! Walker shared by the TypeScript and JavaScript adapters
//!
//! Both grammars use the same node kinds for the constructs indexed here;
//! TypeScript only adds type annotations, interfaces and enums.

use codelens_core::parse::{Binding, ImportedName, ReceiverType, ReferenceShape};
use codelens_core::{EdgeKind, ParseDiagnostic, ParseOutput, SourceFile, UnitId, UnitKind};
use tree_sitter::Node;

use super::{
    Emitter, Scope, ScopeStack, Span, collapse_whitespace, collect_diagnostics, is_name_path, named_children, position,
    strip_generics, summary_line, text,
};
use crate::adapter::{FragmentDefinition, FragmentInfo, Param, dedent};
use crate::error::IndexError;
use crate::parser_pool::{Grammar, ParseRequest, ParserPool};

const SELF_NAMES: &[&str] = &["this"];

const DYNAMIC_CALLS: &[&str] = &["eval", "Function"];

/// Wrapper used to parse a method on its own.
const METHOD_WRAPPER: &str = "class __Fragment {\n";

pub(crate) fn parse(pool: &ParserPool, grammar: Grammar, file: &SourceFile) -> Result<ParseOutput, IndexError> {
    let request = ParseRequest { grammar, content: file.content.clone(), path: file.path.clone() };
    let tree = pool.parse_blocking(request)?.tree;
    let root = tree.root_node();
    let mut walker = EcmaWalker::new(file);
    walker.walk_program(root);
    Ok(walker.em.finish(root))
}

/// Inspect a fragment with each grammar in turn, keeping the first clean parse.
pub(crate) fn inspect_fragment(
    pool: &ParserPool,
    grammars: &[Grammar],
    source: &str,
    expected: UnitKind,
) -> Result<FragmentInfo, IndexError> {
    let body = dedent(source);
    let wrapped = expected == UnitKind::Method;
    let content = if wrapped { format!("{}{}}}\n", METHOD_WRAPPER, body) } else { body };

    let mut best: Option<FragmentInfo> = None;
    for grammar in grammars {
        let request = ParseRequest { grammar: *grammar, content: content.clone(), path: "fragment".into() };
        let tree = pool.parse_blocking(request)?.tree;
        let info = describe_fragment(tree.root_node(), content.as_bytes(), wrapped);
        if info.parses() {
            return Ok(info);
        }
        if best.as_ref().is_none_or(|b| info.diagnostics.len() < b.diagnostics.len()) {
            best = Some(info);
        }
    }
    Ok(best.unwrap_or_default())
}

fn describe_fragment(root: Node<'_>, src: &[u8], wrapped: bool) -> FragmentInfo {
    let mut diagnostics = collect_diagnostics(root, src);
    if wrapped {
        for diagnostic in &mut diagnostics {
            diagnostic.line = diagnostic.line.saturating_sub(1).max(1);
        }
    }
    let container = if wrapped {
        root.named_child(0).and_then(|class| class.child_by_field_name("body"))
    } else {
        Some(root)
    };
    let mut info = FragmentInfo { diagnostics, ..Default::default() };
    let Some(container) = container else {
        info.diagnostics.push(ParseDiagnostic { line: 1, column: 0, message: "not a class member".into() });
        return info;
    };
    for child in named_children(container) {
        if matches!(child.kind(), "comment" | "decorator") {
            continue;
        }
        info.statements += 1;
        if let Some(def) = fragment_definition(child, src) {
            info.definitions.push(def);
        }
    }
    info
}

fn fragment_definition(node: Node<'_>, src: &[u8]) -> Option<FragmentDefinition> {
    let name_of = |n: Node<'_>| n.child_by_field_name("name").map(|n| text(n, src).to_string());
    match node.kind() {
        "export_statement" => match node.child_by_field_name("declaration") {
            Some(decl) => fragment_definition(decl, src),
            None => {
                let value = node.child_by_field_name("value").filter(|v| is_function_value(*v))?;
                Some(FragmentDefinition { kind: UnitKind::Function, name: "default".into(), params: parameters(value, src) })
            }
        },
        "function_declaration" | "generator_function_declaration" => Some(FragmentDefinition {
            kind: UnitKind::Function,
            name: name_of(node)?,
            params: parameters(node, src),
        }),
        "class_declaration" | "abstract_class_declaration" | "interface_declaration" | "enum_declaration" => {
            Some(FragmentDefinition { kind: UnitKind::Class, name: name_of(node)?, params: Vec::new() })
        }
        "lexical_declaration" | "variable_declaration" => {
            let declarators: Vec<Node<'_>> =
                named_children(node).into_iter().filter(|n| n.kind() == "variable_declarator").collect();
            let [declarator] = declarators.as_slice() else { return None };
            let value = declarator.child_by_field_name("value").filter(|v| is_function_value(*v))?;
            Some(FragmentDefinition { kind: UnitKind::Function, name: name_of(*declarator)?, params: parameters(value, src) })
        }
        "method_definition" => Some(FragmentDefinition {
            kind: UnitKind::Method,
            name: name_of(node)?,
            params: parameters(node, src),
        }),
        "public_field_definition" | "field_definition" => {
            let value = node.child_by_field_name("value").filter(|v| is_function_value(*v))?;
            let name = node.child_by_field_name("name").or_else(|| node.child_by_field_name("property"))?;
            Some(FragmentDefinition { kind: UnitKind::Method, name: text(name, src).to_string(), params: parameters(value, src) })
        }
        _ => None,
    }
}

fn is_function_value(node: Node<'_>) -> bool {
    matches!(node.kind(), "arrow_function" | "function_expression" | "function" | "generator_function")
}

/// Parameters of a function-like node.
fn parameters(function: Node<'_>, src: &[u8]) -> Vec<Param> {
    if let Some(single) = function.child_by_field_name("parameter") {
        return vec![Param { name: text(single, src).to_string(), required: true, variadic: false }];
    }
    let Some(list) = function.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut params = Vec::new();
    for child in named_children(list) {
        let param = match child.kind() {
            "identifier" | "object_pattern" | "array_pattern" => {
                Param { name: text(child, src).to_string(), required: true, variadic: false }
            }
            "assignment_pattern" => {
                let name = child.child_by_field_name("left").map(|n| text(n, src)).unwrap_or_default();
                Param { name: name.to_string(), required: false, variadic: false }
            }
            "rest_pattern" => {
                Param { name: text(child, src).trim_start_matches("...").to_string(), required: false, variadic: true }
            }
            "required_parameter" | "optional_parameter" => {
                let Some(pattern) = child.child_by_field_name("pattern") else { continue };
                let name = text(pattern, src).trim_start_matches("...").to_string();
                if name == "this" {
                    continue;
                }
                let variadic = pattern.kind() == "rest_pattern";
                let optional = child.kind() == "optional_parameter" || child.child_by_field_name("value").is_some();
                Param { name, required: !variadic && !optional, variadic }
            }
            _ => continue,
        };
        params.push(param);
    }
    params
}

/// `: Foo<T>` → `Foo`.
fn annotation(node: Node<'_>, src: &[u8]) -> Option<String> {
    let written = strip_generics(text(node, src).trim_start_matches(':').trim());
    is_name_path(written).then(|| written.to_string())
}

/// Import specifier without its quotes.
fn specifier(node: Node<'_>, src: &[u8]) -> String {
    text(node, src).trim_matches(['"', '\'', '`']).to_string()
}

/// Identifiers bound by a parameter or destructuring pattern.
fn pattern_names(node: Node<'_>, src: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => out.push(text(node, src).to_string()),
        "pair_pattern" => {
            if let Some(value) = node.child_by_field_name("value") {
                pattern_names(value, src, out);
            }
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = node.child_by_field_name("left") {
                pattern_names(left, src, out);
            }
        }
        "required_parameter" | "optional_parameter" => {
            if let Some(pattern) = node.child_by_field_name("pattern") {
                pattern_names(pattern, src, out);
            }
        }
        _ => {
            for child in named_children(node) {
                pattern_names(child, src, out);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ExportFlags {
    exported: bool,
    default: bool,
}

impl ExportFlags {
    fn metadata(self) -> Vec<(&'static str, &'static str)> {
        let mut extra = Vec::new();
        if self.exported {
            extra.push(("exported", "true"));
        }
        if self.default {
            extra.push(("default_export", "true"));
        }
        extra
    }
}

struct EcmaWalker<'a> {
    em: Emitter<'a>,
    scopes: ScopeStack,
}

impl<'a> EcmaWalker<'a> {
    fn new(file: &'a SourceFile) -> Self {
        let em = Emitter::new(file);
        let scopes = ScopeStack::new(em.module.clone());
        EcmaWalker { em, scopes }
    }

    fn walk_program(&mut self, root: Node<'_>) {
        let doc = root.named_child(0).filter(|n| n.kind() == "comment").and_then(|c| self.doc_text(c));
        self.em.module_unit(doc);

        let mut pending: Vec<Node<'_>> = Vec::new();
        for child in named_children(root) {
            if child.kind() == "comment" {
                continue;
            }
            if self.is_definition(child) {
                self.flush_block(&mut pending);
                self.statement(child);
            } else {
                pending.push(child);
            }
        }
        self.flush_block(&mut pending);
    }

    fn is_definition(&self, node: Node<'_>) -> bool {
        match node.kind() {
            "import_statement" | "export_statement" | "function_declaration" | "generator_function_declaration"
            | "class_declaration" | "abstract_class_declaration" | "interface_declaration"
            | "type_alias_declaration" | "enum_declaration" | "ambient_declaration" => true,
            // `require` declarations count as imports.
            "lexical_declaration" | "variable_declaration" => named_children(node).iter().any(|d| {
                d.child_by_field_name("value")
                    .is_some_and(|v| is_function_value(v) || self.required_module(v).is_some())
            }),
            _ => false,
        }
    }

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

    fn statement(&mut self, node: Node<'_>) {
        let flags = ExportFlags::default();
        match node.kind() {
            "import_statement" => self.import(node),
            "export_statement" => self.export(node),
            "function_declaration" | "generator_function_declaration" => self.function(node, node, flags),
            "class_declaration" | "abstract_class_declaration" => self.class(node, node, flags, &[]),
            "interface_declaration" | "enum_declaration" => self.interface(node, node, flags),
            "type_alias_declaration" => self.type_alias(node, flags),
            "lexical_declaration" | "variable_declaration" => self.variables(node, node, flags),
            "ambient_declaration" => {
                for child in named_children(node) {
                    self.statement(child);
                }
            }
            _ => self.visit(node),
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "call_expression" => self.call(node),
            "new_expression" => self.construct(node),
            "function_declaration" | "generator_function_declaration" => {
                self.function(node, node, ExportFlags::default())
            }
            "class_declaration" | "abstract_class_declaration" => self.class(node, node, ExportFlags::default(), &[]),
            "arrow_function" | "function_expression" | "function" | "generator_function" => self.closure(node),
            "lexical_declaration" | "variable_declaration" => self.variables(node, node, ExportFlags::default()),
            "import_statement" => self.import(node),
            _ => {
                for child in named_children(node) {
                    self.visit(child);
                }
            }
        }
    }

    fn doc_text(&self, comment: Node<'_>) -> Option<String> {
        let raw = self.em.text(comment);
        if !raw.starts_with("/**") {
            return None;
        }
        summary_line(raw.trim_start_matches("/**").trim_end_matches("*/"))
    }

    /// JSDoc comment directly above `node`.
    fn jsdoc(&self, node: Node<'_>) -> Option<String> {
        let comment = node.prev_named_sibling().filter(|c| c.kind() == "comment")?;
        if comment.end_position().row + 1 < node.start_position().row {
            return None;
        }
        self.doc_text(comment)
    }

    /// Source from `node` up to its body, whitespace collapsed.
    fn header(&self, node: Node<'_>, body: Option<Node<'_>>) -> Option<String> {
        let end = body.map_or(node.end_byte(), |b| b.start_byte());
        let head = std::str::from_utf8(self.em.src.get(node.start_byte()..end)?).ok()?;
        let head = head.trim_end().trim_end_matches("=>").trim_end();
        Some(collapse_whitespace(head))
    }

    fn function(&mut self, def: Node<'_>, outer: Node<'_>, flags: ExportFlags) {
        let name_node = def.child_by_field_name("name");
        let name = match name_node {
            Some(n) => self.em.text(n),
            None if flags.default => "default",
            None => return,
        };
        let parent = self.scopes.current().clone();
        let kind = if parent.kind == UnitKind::Class { UnitKind::Method } else { UnitKind::Function };
        let id = parent.container.child(name);
        let signature = self.header(def, def.child_by_field_name("body"));
        let doc = self.jsdoc(outer);

        self.em.unit(id.clone(), kind, parent.container.clone(), Span::of(outer), signature, doc, &flags.metadata());
        self.em.declare(name, &parent.container, Some(id.clone()), flags.exported, flags.default, name_node.unwrap_or(def));
        self.function_body(def, id, kind, parent.class.clone());
    }

    /// `const name = (...) => ...` at module level.
    fn function_variable(&mut self, declarator: Node<'_>, value: Node<'_>, outer: Node<'_>, flags: ExportFlags) {
        let Some(name_node) = declarator.child_by_field_name("name") else { return };
        let name = self.em.text(name_node);
        let container = self.scopes.current().container.clone();
        let id = container.child(name);
        let signature = self.header(declarator, value.child_by_field_name("body"));
        let doc = self.jsdoc(outer);

        self.em.unit(id.clone(), UnitKind::Function, container.clone(), Span::of(outer), signature, doc, &flags.metadata());
        self.em.declare(name, &container, Some(id.clone()), flags.exported, flags.default, name_node);
        self.function_body(value, id, UnitKind::Function, None);
    }

    fn function_body(&mut self, function: Node<'_>, id: UnitId, kind: UnitKind, class: Option<UnitId>) {
        let mut scope = Scope::new(id.clone(), id, kind, class);
        self.parameters_into(function, &mut scope);
        self.scopes.push(scope);
        if let Some(body) = function.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    /// Anonymous functions keep attributing references to the enclosing unit.
    fn closure(&mut self, function: Node<'_>) {
        let current = self.scopes.current().clone();
        let mut scope = Scope::new(current.unit, current.container, UnitKind::Function, current.class);
        self.parameters_into(function, &mut scope);
        self.scopes.push(scope);
        if let Some(body) = function.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
    }

    fn parameters_into(&self, function: Node<'_>, scope: &mut Scope) {
        let src = self.em.src;
        if let Some(single) = function.child_by_field_name("parameter") {
            scope.locals.insert(text(single, src).to_string());
            return;
        }
        let Some(list) = function.child_by_field_name("parameters") else { return };
        for param in named_children(list) {
            let mut names = Vec::new();
            pattern_names(param, src, &mut names);
            if let ([name], Some(ty)) = (names.as_slice(), param.child_by_field_name("type")) {
                if let Some(ty) = annotation(ty, src) {
                    scope.hints.insert(name.clone(), ReceiverType::Named(ty));
                }
            }
            scope.locals.extend(names);
        }
    }

    fn class(&mut self, def: Node<'_>, outer: Node<'_>, flags: ExportFlags, outer_decorators: &[Node<'_>]) {
        let name_node = def.child_by_field_name("name");
        let name = match name_node {
            Some(n) => self.em.text(n),
            None if flags.default => "default",
            None => return,
        };
        let container = self.scopes.current().container.clone();
        let id = container.child(name);
        let signature = self.header(def, def.child_by_field_name("body"));
        let doc = self.jsdoc(outer);

        self.em.unit(id.clone(), UnitKind::Class, container.clone(), Span::of(outer), signature, doc, &flags.metadata());
        self.em.declare(name, &container, Some(id.clone()), flags.exported, flags.default, name_node.unwrap_or(def));

        let mut bases = Vec::new();
        for heritage in named_children(def).into_iter().filter(|n| n.kind() == "class_heritage") {
            for clause in named_children(heritage) {
                match clause.kind() {
                    "extends_clause" => {
                        let mut cursor = clause.walk();
                        let values: Vec<Node<'_>> = clause.children_by_field_name("value", &mut cursor).collect();
                        for value in values {
                            self.base(&id, value, &mut bases);
                        }
                    }
                    "implements_clause" => {
                        for ty in named_children(clause) {
                            self.base(&id, ty, &mut bases);
                        }
                    }
                    // JavaScript: `extends <expression>` directly under the heritage node.
                    _ => self.base(&id, clause, &mut bases),
                }
            }
        }
        self.em.class_bases(id.clone(), bases);

        for decorator in outer_decorators.iter().copied().chain(named_children(def).into_iter().filter(|n| n.kind() == "decorator")) {
            self.decorator(&id, decorator);
        }

        self.scopes.push(Scope::new(id.clone(), id.clone(), UnitKind::Class, Some(id.clone())));
        if let Some(body) = def.child_by_field_name("body") {
            let mut decorators: Vec<Node<'_>> = Vec::new();
            for member in named_children(body) {
                match member.kind() {
                    "decorator" => decorators.push(member),
                    "method_definition" => {
                        self.method(&id, member, member, &decorators);
                        decorators.clear();
                    }
                    "public_field_definition" | "field_definition" => {
                        match member.child_by_field_name("value") {
                            Some(value) if is_function_value(value) => self.method(&id, member, value, &decorators),
                            Some(value) => self.visit(value),
                            None => {}
                        }
                        decorators.clear();
                    }
                    "comment" => {}
                    _ => self.visit(member),
                }
            }
        }
        self.scopes.pop();
    }

    fn base(&mut self, class: &UnitId, node: Node<'_>, bases: &mut Vec<String>) {
        let written = strip_generics(self.em.text(node));
        if !is_name_path(written) {
            return;
        }
        let shape = self.em.path_shape(written, &self.scopes, SELF_NAMES);
        self.em.reference(class, EdgeKind::Inherits, written, shape, node);
        bases.push(written.to_string());
    }

    /// A method, or a class field holding a function; `function` has the parameters and body.
    fn method(&mut self, class: &UnitId, member: Node<'_>, function: Node<'_>, decorators: &[Node<'_>]) {
        let Some(name_node) = member.child_by_field_name("name").or_else(|| member.child_by_field_name("property")) else {
            return;
        };
        let name = self.em.text(name_node);
        let id = class.child(name);
        let body = function.child_by_field_name("body");
        let signature = self.header(member, body);
        let doc = self.jsdoc(member);

        self.em.unit(id.clone(), UnitKind::Method, class.clone(), Span::of(member), signature, doc, &[]);
        self.em.declare(name, class, Some(id.clone()), false, false, name_node);
        for decorator in decorators {
            self.decorator(&id, *decorator);
        }
        self.function_body(function, id, UnitKind::Method, Some(class.clone()));
    }

    /// Interfaces and enums are indexed as classes.
    fn interface(&mut self, def: Node<'_>, outer: Node<'_>, flags: ExportFlags) {
        let Some(name_node) = def.child_by_field_name("name") else { return };
        let name = self.em.text(name_node);
        let container = self.scopes.current().container.clone();
        let id = container.child(name);
        let signature = self.header(def, def.child_by_field_name("body"));
        let doc = self.jsdoc(outer);

        let mut extra = flags.metadata();
        extra.push(("declared_as", def.kind().trim_end_matches("_declaration")));
        self.em.unit(id.clone(), UnitKind::Class, container.clone(), Span::of(outer), signature, doc, &extra);
        self.em.declare(name, &container, Some(id.clone()), flags.exported, false, name_node);

        let mut bases = Vec::new();
        for clause in named_children(def).into_iter().filter(|n| n.kind() == "extends_type_clause") {
            for ty in named_children(clause) {
                self.base(&id, ty, &mut bases);
            }
        }
        self.em.class_bases(id, bases);
    }

    fn type_alias(&mut self, def: Node<'_>, flags: ExportFlags) {
        if let Some(name_node) = def.child_by_field_name("name") {
            let container = self.scopes.current().container.clone();
            self.em.declare(self.em.text(name_node), &container, None, flags.exported, false, name_node);
        }
    }

    fn variables(&mut self, decl: Node<'_>, outer: Node<'_>, flags: ExportFlags) {
        let declarators: Vec<Node<'_>> = named_children(decl).into_iter().filter(|n| n.kind() == "variable_declarator").collect();
        let single = declarators.len() == 1;
        for declarator in declarators {
            let Some(name_node) = declarator.child_by_field_name("name") else { continue };
            let value = declarator.child_by_field_name("value");

            if let Some(module) = value.and_then(|v| self.required_module(v)) {
                self.require(name_node, module);
                continue;
            }
            if name_node.kind() != "identifier" {
                let mut names = Vec::new();
                pattern_names(name_node, self.em.src, &mut names);
                for name in names {
                    self.bind_local(&name, name_node, flags);
                }
                if let Some(value) = value {
                    self.visit(value);
                }
                continue;
            }

            let name = self.em.text(name_node);
            match value {
                Some(value) if is_function_value(value) && !self.scopes.in_function() => {
                    let span = if single { outer } else { declarator };
                    self.function_variable(declarator, value, span, flags);
                }
                _ => {
                    self.bind_local(name, name_node, flags);
                    let hint = declarator
                        .child_by_field_name("type")
                        .and_then(|t| annotation(t, self.em.src))
                        .or_else(|| value.and_then(|v| self.constructed_type(v)));
                    if let Some(hint) = hint {
                        self.scopes.add_hint(name, ReceiverType::Named(hint));
                    }
                    if let Some(value) = value {
                        self.visit(value);
                    }
                }
            }
        }
    }

    /// A local in functions, a declaration elsewhere.
    fn bind_local(&mut self, name: &str, node: Node<'_>, flags: ExportFlags) {
        if self.scopes.in_function() {
            self.scopes.add_local(name);
        } else {
            let container = self.scopes.current().container.clone();
            self.em.declare(name, &container, None, flags.exported, false, node);
        }
    }

    /// `new Foo(...)` → `Foo`.
    fn constructed_type(&self, value: Node<'_>) -> Option<String> {
        if value.kind() != "new_expression" {
            return None;
        }
        let written = self.em.text(value.child_by_field_name("constructor")?);
        is_name_path(written).then(|| written.to_string())
    }

    /// `require("x")` → `x`.
    fn required_module(&self, value: Node<'_>) -> Option<String> {
        if value.kind() != "call_expression" {
            return None;
        }
        let function = value.child_by_field_name("function")?;
        if self.em.text(function) != "require" {
            return None;
        }
        let arg = value.child_by_field_name("arguments")?.named_child(0)?;
        (arg.kind() == "string").then(|| specifier(arg, self.em.src))
    }

    /// `const x = require("m")` and `const { a, b: c } = require("m")`.
    fn require(&mut self, pattern: Node<'_>, module: String) {
        let from = self.scopes.current().unit.clone();
        match pattern.kind() {
            "identifier" => {
                let local = self.em.text(pattern);
                self.import_binding(&from, local, &module, ImportedName::Namespace, pattern);
            }
            "object_pattern" => {
                for prop in named_children(pattern) {
                    match prop.kind() {
                        "shorthand_property_identifier_pattern" => {
                            let name = self.em.text(prop);
                            self.import_binding(&from, name, &module, ImportedName::Named(name.to_string()), prop);
                        }
                        "pair_pattern" => {
                            let key = prop.child_by_field_name("key").map(|k| self.em.text(k)).unwrap_or_default();
                            let local = prop.child_by_field_name("value").map(|v| self.em.text(v)).unwrap_or_default();
                            self.import_binding(&from, local, &module, ImportedName::Named(key.to_string()), prop);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn import_binding(&mut self, from: &UnitId, local: &str, module: &str, imported: ImportedName, node: Node<'_>) {
        if local.is_empty() || !is_name_path(local) {
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

    fn import(&mut self, node: Node<'_>) {
        let Some(source) = node.child_by_field_name("source") else { return };
        let module = specifier(source, self.em.src);
        let from = self.scopes.current().unit.clone();
        let Some(clause) = named_children(node).into_iter().find(|n| n.kind() == "import_clause") else {
            return;
        };
        for part in named_children(clause) {
            match part.kind() {
                "identifier" => {
                    let local = self.em.text(part);
                    self.import_binding(&from, local, &module, ImportedName::Default, part);
                }
                "namespace_import" => {
                    if let Some(alias) = part.named_child(0) {
                        let local = self.em.text(alias);
                        self.import_binding(&from, local, &module, ImportedName::Namespace, part);
                    }
                }
                "named_imports" => {
                    for spec in named_children(part).into_iter().filter(|n| n.kind() == "import_specifier") {
                        let name = spec.child_by_field_name("name").map(|n| self.em.text(n)).unwrap_or_default();
                        let local = spec.child_by_field_name("alias").map(|n| self.em.text(n)).unwrap_or(name);
                        let imported = if name == "default" { ImportedName::Default } else { ImportedName::Named(name.to_string()) };
                        self.import_binding(&from, local, &module, imported, spec);
                    }
                }
                _ => {}
            }
        }
    }

    fn export(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let is_default = node.children(&mut cursor).any(|c| c.kind() == "default");
        let flags = ExportFlags { exported: true, default: is_default };
        let decorators: Vec<Node<'_>> = named_children(node).into_iter().filter(|n| n.kind() == "decorator").collect();
        let module = self.em.module.clone();

        if let Some(decl) = node.child_by_field_name("declaration") {
            match decl.kind() {
                "function_declaration" | "generator_function_declaration" | "function_expression" | "function" => {
                    self.function(decl, node, flags)
                }
                "class_declaration" | "abstract_class_declaration" | "class" => self.class(decl, node, flags, &decorators),
                "interface_declaration" | "enum_declaration" => self.interface(decl, node, flags),
                "type_alias_declaration" => self.type_alias(decl, flags),
                "lexical_declaration" | "variable_declaration" => self.variables(decl, node, flags),
                _ => self.visit(decl),
            }
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            match value.kind() {
                "identifier" => {
                    let name = self.em.text(value);
                    self.export_binding("default", None, ImportedName::Named(name.to_string()), value);
                }
                "arrow_function" | "function_expression" | "function" | "generator_function" => {
                    self.function(value, node, flags)
                }
                "class" => self.class(value, node, flags, &decorators),
                _ => {
                    self.em.declare("default", &module, None, true, true, value);
                    self.visit(value);
                }
            }
            return;
        }

        let source = node.child_by_field_name("source").map(|s| specifier(s, self.em.src));
        let mut listed = false;
        for child in named_children(node) {
            match child.kind() {
                "export_clause" => {
                    listed = true;
                    for spec in named_children(child).into_iter().filter(|n| n.kind() == "export_specifier") {
                        let name = spec.child_by_field_name("name").map(|n| self.em.text(n)).unwrap_or_default();
                        let alias = spec.child_by_field_name("alias").map(|n| self.em.text(n)).unwrap_or(name);
                        let imported = if source.is_some() && name == "default" {
                            ImportedName::Default
                        } else {
                            ImportedName::Named(name.to_string())
                        };
                        self.export_binding(alias, source.clone(), imported, spec);
                    }
                }
                "namespace_export" => {
                    listed = true;
                    if let Some(alias) = child.named_child(0) {
                        let alias = self.em.text(alias);
                        self.export_binding(alias, source.clone(), ImportedName::Namespace, child);
                    }
                }
                _ => {}
            }
        }
        if !listed && source.is_some() {
            self.export_binding("*", source, ImportedName::All, node);
        }
    }

    fn export_binding(&mut self, local: &str, module: Option<String>, imported: ImportedName, node: Node<'_>) {
        if local.is_empty() {
            return;
        }
        let from = self.em.module.clone();
        self.em.bind(
            &from,
            Binding {
                local: local.trim_matches(['"', '\'']).to_string(),
                module,
                imported,
                exported: true,
                in_scope: false,
                position: position(node),
            },
        );
    }

    /// Member path with formatting whitespace removed: `a\n  .b` → `a.b`.
    fn member_path(&self, node: Node<'_>) -> String {
        self.em.text(node).chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn call(&mut self, node: Node<'_>) {
        let from = self.scopes.current().unit.clone();
        if let Some(function) = node.child_by_field_name("function") {
            match function.kind() {
                "identifier" => {
                    let name = self.em.text(function);
                    if DYNAMIC_CALLS.contains(&name) {
                        let shape = ReferenceShape::Dynamic { construct: name.to_string() };
                        self.em.reference(&from, EdgeKind::Calls, name, shape, function);
                    } else if name != "require" {
                        self.em.reference(&from, EdgeKind::Calls, name, ReferenceShape::Name, function);
                    }
                }
                "member_expression" => {
                    let path = self.member_path(function);
                    if is_name_path(&path) {
                        let shape = self.em.path_shape(&path, &self.scopes, SELF_NAMES);
                        self.em.reference(&from, EdgeKind::Calls, &path, shape, function);
                    } else if let (Some(object), Some(property)) =
                        (function.child_by_field_name("object"), function.child_by_field_name("property"))
                    {
                        // Receiver is an expression such as `fetch().then()`.
                        let member = self.em.text(property);
                        let shape = ReferenceShape::Member {
                            receiver: self.member_path(object),
                            member: member.to_string(),
                            receiver_type: None,
                        };
                        self.em.reference(&from, EdgeKind::Calls, member, shape, function);
                        self.visit(object);
                    }
                }
                "subscript_expression" => {
                    let shape = ReferenceShape::Dynamic { construct: "computed member".to_string() };
                    let written = self.em.text(function);
                    self.em.reference(&from, EdgeKind::Calls, written, shape, function);
                    self.visit(function);
                }
                "import" => {
                    let shape = ReferenceShape::Dynamic { construct: "import".to_string() };
                    self.em.reference(&from, EdgeKind::Imports, "import", shape, function);
                }
                _ => self.visit(function),
            }
        }
        self.arguments(&from, node);
    }

    fn construct(&mut self, node: Node<'_>) {
        let from = self.scopes.current().unit.clone();
        if let Some(constructor) = node.child_by_field_name("constructor") {
            let path = self.member_path(constructor);
            if is_name_path(&path) {
                let shape = self.em.path_shape(&path, &self.scopes, SELF_NAMES);
                self.em.reference(&from, EdgeKind::Calls, &path, shape, constructor);
            } else {
                self.visit(constructor);
            }
        }
        self.arguments(&from, node);
    }

    fn arguments(&mut self, from: &UnitId, call: Node<'_>) {
        let Some(arguments) = call.child_by_field_name("arguments") else { return };
        for arg in named_children(arguments) {
            if arg.kind() == "identifier" {
                let name = self.em.text(arg);
                if !self.scopes.is_local(name) {
                    self.em.reference(from, EdgeKind::References, name, ReferenceShape::Name, arg);
                }
            }
            self.visit(arg);
        }
    }

    fn decorator(&mut self, target: &UnitId, decorator: Node<'_>) {
        let Some(mut expr) = decorator.named_child(0) else { return };
        if expr.kind() == "call_expression" {
            match expr.child_by_field_name("function") {
                Some(function) => expr = function,
                None => return,
            }
        }
        let path = self.member_path(expr);
        if !is_name_path(&path) {
            return;
        }
        let shape = self.em.path_shape(&path, &self.scopes, SELF_NAMES);
        self.em.reference(target, EdgeKind::Decorates, &path, shape, expr);
    }
}
