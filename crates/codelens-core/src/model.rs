//! Core data structures for the source-unit graph

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Stable, human-readable identifier of a source unit: `package.module.Container.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct UnitId(pub String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        UnitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of a unit declared directly inside this one.
    pub fn child(&self, name: &str) -> UnitId {
        if self.0.is_empty() {
            UnitId(name.to_string())
        } else {
            UnitId(format!("{}.{}", self.0, name))
        }
    }

    /// Enclosing container id, if any.
    pub fn parent(&self) -> Option<UnitId> {
        self.0.rsplit_once('.').map(|(parent, _)| UnitId(parent.to_string()))
    }

    /// Last dotted segment.
    pub fn local_name(&self) -> &str {
        self.0.rsplit_once('.').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for UnitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(value: &str) -> Self {
        UnitId(value.to_string())
    }
}

impl From<String> for UnitId {
    fn from(value: String) -> Self {
        UnitId(value)
    }
}

/// Discriminates what kind of code entity a unit represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Module,
    Class,
    Function,
    Method,
    /// Contiguous top-level statements not owned by any definition.
    Block,
}

impl UnitKind {
    /// Kinds reported by dead-code analysis.
    pub fn is_definition(self) -> bool {
        matches!(self, UnitKind::Class | UnitKind::Function | UnitKind::Method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Module => "module",
            UnitKind::Class => "class",
            UnitKind::Function => "function",
            UnitKind::Method => "method",
            UnitKind::Block => "block",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Languages with a parser adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    JavaScript,
    Other,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") | Some("pyi") => Language::Python,
            Some("ts") | Some("tsx") | Some("mts") | Some("cts") => Language::TypeScript,
            Some("js") | Some("jsx") | Some("mjs") | Some("cjs") => Language::JavaScript,
            _ => Language::Other,
        }
    }

    /// TypeScript and JavaScript share module semantics.
    pub fn is_ecmascript(self) -> bool {
        matches!(self, Language::TypeScript | Language::JavaScript)
    }
}

/// Where a unit lives in the tree. Lines are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl SourceLocation {
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    pub fn overlaps(&self, other: &SourceLocation) -> bool {
        self.file == other.file
            && self.start_line <= other.end_line
            && other.start_line <= self.end_line
    }
}

/// One addressable piece of code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub name: String,
    pub parent: Option<UnitId>,
    pub language: Language,
    pub location: SourceLocation,
    /// blake3 of the unit's source text.
    pub content_hash: String,
    pub signature: Option<String>,
    pub doc_summary: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl SourceUnit {
    pub fn file(&self) -> &Path {
        &self.location.file
    }

    /// The module id this unit belongs to (its own id for modules).
    pub fn module_id(&self) -> Option<&str> {
        match self.kind {
            UnitKind::Module => Some(self.id.as_str()),
            _ => self.metadata.get("module").map(String::as_str),
        }
    }
}

/// Hex blake3 digest used for every content hash in the graph.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// What kind of relationship an edge represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Imports,
    References,
    Inherits,
    /// From a decorated unit to the decorator applied to it.
    Decorates,
    Contains,
    Mocks,
    CallsHttp,
    ReadsStorage,
    WritesStorage,
    Custom(String),
}

impl EdgeKind {
    /// Usage edges carry a dependency; imports are bindings and contains is structure.
    pub fn is_usage(&self) -> bool {
        !matches!(self, EdgeKind::Imports | EdgeKind::Contains)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Imports => "imports",
            EdgeKind::References => "references",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Decorates => "decorates",
            EdgeKind::Contains => "contains",
            EdgeKind::Mocks => "mocks",
            EdgeKind::CallsHttp => "calls_http",
            EdgeKind::ReadsStorage => "reads_storage",
            EdgeKind::WritesStorage => "writes_storage",
            EdgeKind::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> EdgeKind {
        match name {
            "calls" => EdgeKind::Calls,
            "imports" => EdgeKind::Imports,
            "references" => EdgeKind::References,
            "inherits" => EdgeKind::Inherits,
            "decorates" => EdgeKind::Decorates,
            "contains" => EdgeKind::Contains,
            "mocks" => EdgeKind::Mocks,
            "calls_http" => EdgeKind::CallsHttp,
            "reads_storage" => EdgeKind::ReadsStorage,
            "writes_storage" => EdgeKind::WritesStorage,
            other => EdgeKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sure the resolver is about an edge target. Ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Unresolved,
    External,
    Inferred,
    Resolved,
}

impl Confidence {
    /// Confidence after a runtime observation confirmed the edge. Never decreases.
    ///
    /// Only edges with a target can be confirmed, so unresolved edges never
    /// reach this; an observation at such a call site becomes a new edge.
    pub fn reconcile_observed(self) -> Confidence {
        match self {
            Confidence::Inferred => Confidence::Resolved,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Unresolved => "unresolved",
            Confidence::External => "external",
            Confidence::Inferred => "inferred",
            Confidence::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Confidence> {
        match value {
            "unresolved" => Some(Confidence::Unresolved),
            "external" => Some(Confidence::External),
            "inferred" => Some(Confidence::Inferred),
            "resolved" => Some(Confidence::Resolved),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Static,
    Observed,
    Both,
}

impl Provenance {
    pub fn merge(self, other: Provenance) -> Provenance {
        if self == other { self } else { Provenance::Both }
    }
}

/// Why a reference did not resolve cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NoSymbol,
    NoDeclarations,
    UnsupportedReferenceShape,
    FileNotFound,
    AliasCycle,
    AliasDepthExceeded,
    Timeout,
    ResolverFailed,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::NoSymbol => "no_symbol",
            ReasonCode::NoDeclarations => "no_declarations",
            ReasonCode::UnsupportedReferenceShape => "unsupported_reference_shape",
            ReasonCode::FileNotFound => "file_not_found",
            ReasonCode::AliasCycle => "alias_cycle",
            ReasonCode::AliasDepthExceeded => "alias_depth_exceeded",
            ReasonCode::Timeout => "timeout",
            ReasonCode::ResolverFailed => "resolver_failed",
        }
    }

    pub fn parse(value: &str) -> Option<ReasonCode> {
        match value {
            "no_symbol" => Some(ReasonCode::NoSymbol),
            "no_declarations" => Some(ReasonCode::NoDeclarations),
            "unsupported_reference_shape" => Some(ReasonCode::UnsupportedReferenceShape),
            "file_not_found" => Some(ReasonCode::FileNotFound),
            "alias_cycle" => Some(ReasonCode::AliasCycle),
            "alias_depth_exceeded" => Some(ReasonCode::AliasDepthExceeded),
            "timeout" => Some(ReasonCode::Timeout),
            "resolver_failed" => Some(ReasonCode::ResolverFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub target: Option<UnitId>,
    pub confidence: Confidence,
    pub reason: Option<ReasonCode>,
}

impl Resolution {
    pub fn resolved(target: impl Into<UnitId>) -> Self {
        Resolution { target: Some(target.into()), confidence: Confidence::Resolved, reason: None }
    }

    pub fn inferred(target: impl Into<UnitId>) -> Self {
        Resolution { target: Some(target.into()), confidence: Confidence::Inferred, reason: None }
    }

    pub fn external(target: impl Into<UnitId>) -> Self {
        Resolution { target: Some(target.into()), confidence: Confidence::External, reason: None }
    }

    /// Unresolved results never name a target.
    pub fn unresolved(reason: ReasonCode) -> Self {
        Resolution { target: None, confidence: Confidence::Unresolved, reason: Some(reason) }
    }

    pub fn with_reason(mut self, reason: ReasonCode) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Keep the stronger of two results for the same reference.
    pub fn stronger(self, other: Resolution) -> Resolution {
        if other.confidence > self.confidence { other } else { self }
    }
}

/// A directed relationship between two units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: UnitId,
    /// `None` only for unresolved edges.
    pub to: Option<UnitId>,
    pub kind: EdgeKind,
    pub confidence: Confidence,
    pub provenance: Provenance,
    pub reason: Option<ReasonCode>,
    /// Raw reference text as written in source.
    pub symbol: String,
    /// File the edge is attributed to (the file of `from`).
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl Edge {
    /// Build a static edge from a resolution result.
    pub fn from_resolution(
        from: UnitId,
        kind: EdgeKind,
        resolution: Resolution,
        symbol: impl Into<String>,
        file: PathBuf,
        line: u32,
        column: u32,
    ) -> Self {
        let Resolution { target, confidence, reason } = resolution;
        let target = if confidence == Confidence::Unresolved { None } else { target };
        Edge {
            from,
            to: target,
            kind,
            confidence,
            provenance: Provenance::Static,
            reason,
            symbol: symbol.into(),
            file,
            line,
            column,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.confidence == Confidence::Unresolved
    }

    /// Same endpoints and kind.
    pub fn same_link(&self, from: &UnitId, to: &UnitId, kind: &EdgeKind) -> bool {
        &self.from == from && self.to.as_ref() == Some(to) && &self.kind == kind
    }

    /// Enforce the target/confidence invariant.
    pub fn validate(&self) -> Result<(), CoreError> {
        match (&self.to, self.confidence) {
            (None, Confidence::Unresolved) => Ok(()),
            (Some(_), Confidence::Unresolved) => Err(CoreError::InvalidEdge {
                from: self.from.clone(),
                reason: "unresolved edge names a target".to_string(),
            }),
            (None, confidence) => Err(CoreError::InvalidEdge {
                from: self.from.clone(),
                reason: format!("{} edge has no target", confidence),
            }),
            (Some(_), _) => Ok(()),
        }
    }
}
