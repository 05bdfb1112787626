//! Parser adapter output: units, raw references, bindings and diagnostics

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::links::LinkFacts;
use crate::model::{EdgeKind, Language, SourceUnit, UnitId};

/// A file handed to a parser adapter.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Project-relative path.
    pub path: PathBuf,
    /// Dotted module id derived from the path.
    pub module_id: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, module_id: impl Into<String>, content: impl Into<String>) -> Self {
        SourceFile { path: path.into(), module_id: module_id.into(), content: content.into() }
    }

    pub fn language(&self) -> Language {
        Language::from_path(&self.path)
    }
}

/// Position of a reference inside its file. Line is 1-based, column 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

/// Static type hint for the receiver of a member access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiverType {
    /// Receiver is known to be an instance of this unit (`self`, `this`).
    Unit(UnitId),
    /// Receiver was annotated or constructed with this type name.
    Named(String),
}

/// Syntactic shape of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceShape {
    /// Bare identifier.
    Name,
    /// `receiver.member`.
    Member {
        receiver: String,
        member: String,
        receiver_type: Option<ReceiverType>,
    },
    /// An import or re-export statement; index into `ParseOutput::bindings`.
    Binding { index: usize },
    /// Target is computed at runtime (`getattr`, `eval`, `obj[key]()`).
    Dynamic { construct: String },
}

/// A reference as found by the parser, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReference {
    /// Enclosing unit that makes the reference.
    pub from: UnitId,
    pub kind: EdgeKind,
    pub text: String,
    pub shape: ReferenceShape,
    pub position: Position,
}

/// What an import or export binding refers to in the source module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportedName {
    Named(String),
    Default,
    /// The module object itself (`import * as ns`, `import pkg.mod`).
    Namespace,
    /// Every export of the module (`export *`, `from m import *`).
    All,
}

/// An alias introduced by an import, re-export or export list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Name bound by this statement; the exported name for re-exports.
    pub local: String,
    /// Module specifier as written; `None` for local export lists.
    pub module: Option<String>,
    pub imported: ImportedName,
    /// Visible to modules importing this file.
    pub exported: bool,
    /// Visible to names looked up inside this file.
    pub in_scope: bool,
    pub position: Position,
}

/// A named declaration that can terminate an alias chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    /// Container the name is declared in (module id for top level).
    pub scope: UnitId,
    /// Unit created for the declaration, if any.
    pub unit: Option<UnitId>,
    pub exported: bool,
    pub default_export: bool,
    pub position: Position,
}

/// Non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// Everything an adapter extracts from one file.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub units: Vec<SourceUnit>,
    pub references: Vec<RawReference>,
    pub bindings: Vec<Binding>,
    pub declarations: Vec<Declaration>,
    /// Base-class expressions per class unit, as written.
    pub class_bases: BTreeMap<UnitId, Vec<String>>,
    pub diagnostics: Vec<ParseDiagnostic>,
    pub links: LinkFacts,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
