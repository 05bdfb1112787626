//! Codelens Core: source-unit model, graph store, symbol table and impact analysis

pub mod cache;
pub mod config;
pub mod diff;
pub mod entry;
pub mod error;
pub mod graph;
pub mod impact;
pub mod links;
pub mod model;
pub mod parse;
pub mod symbols;
pub mod workspace;

#[cfg(test)]
pub mod tests;

#[cfg(test)]
pub mod test_utils;

pub use config::{LensConfig, SignaturePolicy};
pub use diff::{FileDelta, GraphDiff};
pub use entry::detect_entry_points;
pub use error::CoreError;
pub use graph::{FileUpdate, GraphSnapshot, GraphStore, MergeStats, ObservedEdge};
pub use impact::{
    Cycle, CycleKind, Dependent, ImpactReport, Severity, SeverityInputs, SeverityPolicy, Usage, check_impact, cycles,
    dead_code, direct_dependents, find_usages, transitive_dependents,
};
pub use links::{HttpCall, HttpRoute, LinkFacts, MockTarget, StorageAccess, StorageOp, StorageTable, link_edges};
pub use model::{
    Confidence, Edge, EdgeKind, Language, Provenance, ReasonCode, Resolution, SourceLocation, SourceUnit, UnitId,
    UnitKind, content_hash,
};
pub use parse::{
    Binding, Declaration, ImportedName, ParseDiagnostic, ParseOutput, Position, RawReference, ReceiverType,
    ReferenceShape, SourceFile,
};
pub use symbols::{ClassInfo, FileSymbols, ModuleLookup, SymbolSource, SymbolTable};
pub use workspace::{Origin, ProjectLayout, WorkspaceType, detect_workspace};
