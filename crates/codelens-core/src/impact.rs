//! Impact analysis over a graph snapshot
//!
//! Every function here is pure: it reads one snapshot and never mutates it.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Component, PathBuf};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::graph::GraphSnapshot;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// The four quantities severity is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityInputs {
    pub direct_count: usize,
    pub transitive_count: usize,
    pub has_test_coverage: bool,
    pub crosses_module_boundary: bool,
}

/// One row of the severity table. A row matches when every condition holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityRule {
    pub level: Severity,
    pub min_direct: usize,
    pub min_transitive: usize,
    /// Only matches when no test covers the unit.
    pub untested_only: bool,
    /// Only matches when a dependent lives in another module.
    pub cross_module_only: bool,
}

impl SeverityRule {
    fn new(level: Severity, min_direct: usize, min_transitive: usize) -> Self {
        SeverityRule { level, min_direct, min_transitive, untested_only: false, cross_module_only: false }
    }

    fn untested(mut self) -> Self {
        self.untested_only = true;
        self
    }

    fn cross_module(mut self) -> Self {
        self.cross_module_only = true;
        self
    }

    pub fn matches(&self, inputs: &SeverityInputs) -> bool {
        inputs.direct_count >= self.min_direct
            && inputs.transitive_count >= self.min_transitive
            && (!self.untested_only || !inputs.has_test_coverage)
            && (!self.cross_module_only || inputs.crosses_module_boundary)
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.min_direct > 0 {
            parts.push(format!("direct >= {}", self.min_direct));
        }
        if self.min_transitive > 0 {
            parts.push(format!("transitive >= {}", self.min_transitive));
        }
        if self.untested_only {
            parts.push("no covering test".to_string());
        }
        if self.cross_module_only {
            parts.push("crosses module boundary".to_string());
        }
        if parts.is_empty() {
            parts.push("always".to_string());
        }
        format!("{}: {}", self.level, parts.join(", "))
    }
}

/// Severity table. The result is the highest level among matching rules.
///
/// Rules only hold lower bounds and "risky-only" flags, which keeps the
/// result monotone in every input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityPolicy {
    pub rules: Vec<SeverityRule>,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        SeverityPolicy {
            rules: vec![
                SeverityRule::new(Severity::Critical, 11, 0).untested(),
                SeverityRule::new(Severity::High, 11, 0),
                SeverityRule::new(Severity::High, 0, 21),
                SeverityRule::new(Severity::High, 6, 0).untested().cross_module(),
                SeverityRule::new(Severity::Medium, 6, 0),
                SeverityRule::new(Severity::Medium, 0, 6),
                SeverityRule::new(Severity::Medium, 2, 0).untested().cross_module(),
            ],
        }
    }
}

impl SeverityPolicy {
    /// Deterministic severity plus the rule that produced it.
    pub fn assess(&self, inputs: &SeverityInputs) -> (Severity, String) {
        self.rules
            .iter()
            .filter(|rule| rule.matches(inputs))
            .max_by_key(|rule| rule.level)
            .map(|rule| (rule.level, rule.describe()))
            .unwrap_or((Severity::Low, "LOW: no rule matched".to_string()))
    }
}

/// A unit reached by walking reverse edges, at its shallowest depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub id: UnitId,
    pub depth: usize,
}

/// Units with a usage edge into `id`, excluding unresolved edges.
pub fn direct_dependents(snapshot: &GraphSnapshot, id: &str) -> Vec<UnitId> {
    let set: BTreeSet<UnitId> = snapshot
        .edges_to(id)
        .filter(|e| e.confidence != Confidence::Unresolved && e.kind.is_usage())
        .filter(|e| e.from.as_str() != id)
        .map(|e| e.from.clone())
        .collect();
    set.into_iter().collect()
}

/// Breadth-first walk over reverse usage edges up to `max_depth` hops.
pub fn transitive_dependents(snapshot: &GraphSnapshot, id: &str, max_depth: usize) -> Vec<Dependent> {
    let mut depth_of: HashMap<UnitId, usize> = HashMap::new();
    let mut queue: VecDeque<(UnitId, usize)> = VecDeque::new();
    queue.push_back((UnitId::new(id), 0));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for dependent in direct_dependents(snapshot, current.as_str()) {
            if dependent.as_str() == id || depth_of.contains_key(&dependent) {
                continue;
            }
            depth_of.insert(dependent.clone(), depth + 1);
            queue.push_back((dependent, depth + 1));
        }
    }

    let mut dependents: Vec<Dependent> = depth_of.into_iter().map(|(id, depth)| Dependent { id, depth }).collect();
    dependents.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.id.cmp(&b.id)));
    dependents
}

/// Classes that inherit from `id`.
pub fn inheritors(snapshot: &GraphSnapshot, id: &str) -> Vec<UnitId> {
    let set: BTreeSet<UnitId> = snapshot
        .edges_to(id)
        .filter(|e| e.kind == EdgeKind::Inherits && e.confidence != Confidence::Unresolved)
        .map(|e| e.from.clone())
        .collect();
    set.into_iter().collect()
}

/// Whether a unit is test code, judged by its name and its file.
pub fn is_test_unit(unit: &SourceUnit) -> bool {
    let name = unit.name.as_str();
    let named_like_test = match unit.kind {
        UnitKind::Class => name.starts_with("Test"),
        UnitKind::Function | UnitKind::Method => name.starts_with("test_") || name == "test",
        _ => false,
    };
    named_like_test || is_test_file(&unit.location.file)
}

/// `test_*.py`, `*_test.py`, `*.test.ts`, `*.spec.js`, or anything under a tests directory.
pub fn is_test_file(path: &std::path::Path) -> bool {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let in_test_dir = path.components().any(|c| match c {
        Component::Normal(s) => matches!(s.to_str(), Some("tests" | "test" | "__tests__")),
        _ => false,
    });
    in_test_dir
        || file_name.starts_with("test_")
        || file_name.ends_with("_test.py")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
}

/// Any dependent, at any walked depth, is test code.
pub fn has_test_coverage(snapshot: &GraphSnapshot, dependents: &[Dependent]) -> bool {
    dependents
        .iter()
        .filter_map(|d| snapshot.unit(d.id.as_str()))
        .any(is_test_unit)
}

/// Some dependent lives in a different module than `id`.
pub fn crosses_module_boundary(snapshot: &GraphSnapshot, id: &str, dependents: &[Dependent]) -> bool {
    let Some(target) = snapshot.unit(id) else {
        return false;
    };
    let home = module_of(snapshot, target);
    dependents
        .iter()
        .filter_map(|d| snapshot.unit(d.id.as_str()))
        .any(|u| module_of(snapshot, u) != home)
}

/// Module id owning a unit.
pub fn module_of(snapshot: &GraphSnapshot, unit: &SourceUnit) -> Option<String> {
    if let Some(module) = unit.module_id() {
        return Some(module.to_string());
    }
    snapshot
        .units_in_file(&unit.location.file)
        .into_iter()
        .find(|u| u.kind == UnitKind::Module)
        .map(|u| u.id.to_string())
}

/// Severity of changing `id`, walking dependents up to `max_depth`.
pub fn severity(snapshot: &GraphSnapshot, id: &str, max_depth: usize, policy: &SeverityPolicy) -> Severity {
    let direct = direct_dependents(snapshot, id);
    let transitive = transitive_dependents(snapshot, id, max_depth);
    let inputs = SeverityInputs {
        direct_count: direct.len(),
        transitive_count: transitive.len(),
        has_test_coverage: has_test_coverage(snapshot, &transitive),
        crosses_module_boundary: crosses_module_boundary(snapshot, id, &transitive),
    };
    policy.assess(&inputs).0
}

/// Everything a caller needs before changing a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactReport {
    pub unit: UnitId,
    pub kind: UnitKind,
    pub file: PathBuf,
    pub direct_dependents: Vec<UnitId>,
    pub transitive_dependents: Vec<Dependent>,
    pub inheritors: Vec<UnitId>,
    pub has_test_coverage: bool,
    pub crosses_module_boundary: bool,
    pub severity: Severity,
    pub severity_reason: String,
    pub warnings: Vec<String>,
}

impl ImpactReport {
    pub fn inputs(&self) -> SeverityInputs {
        SeverityInputs {
            direct_count: self.direct_dependents.len(),
            transitive_count: self.transitive_dependents.len(),
            has_test_coverage: self.has_test_coverage,
            crosses_module_boundary: self.crosses_module_boundary,
        }
    }
}

/// Full impact report for `id`.
pub fn check_impact(
    snapshot: &GraphSnapshot,
    id: &str,
    max_depth: usize,
    policy: &SeverityPolicy,
) -> Result<ImpactReport, CoreError> {
    let unit = snapshot.unit(id).ok_or_else(|| CoreError::not_found(id))?;
    let direct = direct_dependents(snapshot, id);
    let transitive = transitive_dependents(snapshot, id, max_depth);
    let has_tests = has_test_coverage(snapshot, &transitive);
    let crosses = crosses_module_boundary(snapshot, id, &transitive);
    let inputs = SeverityInputs {
        direct_count: direct.len(),
        transitive_count: transitive.len(),
        has_test_coverage: has_tests,
        crosses_module_boundary: crosses,
    };
    let (severity, severity_reason) = policy.assess(&inputs);

    let mut warnings = Vec::new();
    let unresolved: Vec<&Edge> = snapshot.edges_from(id).filter(|e| e.is_unresolved()).collect();
    if !unresolved.is_empty() {
        let symbols: BTreeSet<&str> = unresolved.iter().map(|e| e.symbol.as_str()).collect();
        warnings.push(format!(
            "{} outgoing reference(s) could not be resolved: {}",
            unresolved.len(),
            symbols.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }
    let inferred_in = snapshot
        .edges_to(id)
        .filter(|e| e.confidence == Confidence::Inferred && e.kind.is_usage())
        .count();
    if inferred_in > 0 {
        warnings.push(format!("{} incoming edge(s) are inferred, not proven", inferred_in));
    }
    if !has_tests && !direct.is_empty() {
        warnings.push("no test reaches this unit".to_string());
    }

    Ok(ImpactReport {
        unit: unit.id.clone(),
        kind: unit.kind,
        file: unit.location.file.clone(),
        direct_dependents: direct,
        transitive_dependents: transitive,
        inheritors: inheritors(snapshot, id),
        has_test_coverage: has_tests,
        crosses_module_boundary: crosses,
        severity,
        severity_reason,
        warnings,
    })
}

/// One incoming reference to a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub from: UnitId,
    pub kind: EdgeKind,
    pub confidence: Confidence,
    pub provenance: Provenance,
    pub file: PathBuf,
    pub line: u32,
}

/// Every edge pointing at `id`, in file/line order.
pub fn find_usages(snapshot: &GraphSnapshot, id: &str) -> Vec<Usage> {
    let mut usages: Vec<Usage> = snapshot
        .edges_to(id)
        .filter(|e| e.kind != EdgeKind::Contains)
        .map(|e| Usage {
            from: e.from.clone(),
            kind: e.kind.clone(),
            confidence: e.confidence,
            provenance: e.provenance,
            file: e.file.clone(),
            line: e.line,
        })
        .collect();
    usages.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)).then_with(|| a.from.cmp(&b.from)));
    usages
}

/// Units of definition kind not reachable from `entry_points`.
///
/// Unresolved and containment edges never make anything live. A live class
/// keeps its members live.
pub fn dead_code(snapshot: &GraphSnapshot, entry_points: &[UnitId]) -> Vec<UnitId> {
    let mut live: HashSet<UnitId> = HashSet::new();
    let mut queue: VecDeque<UnitId> = VecDeque::new();
    for entry in entry_points {
        if snapshot.contains(entry.as_str()) && live.insert(entry.clone()) {
            queue.push_back(entry.clone());
        }
    }

    while let Some(current) = queue.pop_front() {
        let mut next: Vec<UnitId> = snapshot
            .edges_from(current.as_str())
            .filter(|e| e.confidence != Confidence::Unresolved && e.kind != EdgeKind::Contains)
            .filter_map(|e| e.to.clone())
            .filter(|to| snapshot.contains(to.as_str()))
            .collect();
        if snapshot.unit(current.as_str()).is_some_and(|u| u.kind == UnitKind::Class) {
            next.extend(snapshot.children(current.as_str()).into_iter().map(|u| u.id.clone()));
        }
        for id in next {
            if live.insert(id.clone()) {
                queue.push_back(id);
            }
        }
    }

    let mut dead: Vec<UnitId> = snapshot
        .units()
        .filter(|u| u.kind.is_definition() && !live.contains(&u.id))
        .map(|u| u.id.clone())
        .collect();
    dead.sort();
    dead
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    Import,
    Inheritance,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cycle {
    pub kind: CycleKind,
    /// Sorted member ids: module ids for import cycles, class ids for inheritance.
    pub members: Vec<String>,
}

/// Strongly connected components over imports (lifted to modules) and inherits.
/// Call edges are not considered.
pub fn cycles(snapshot: &GraphSnapshot) -> Vec<Cycle> {
    let mut import_links: BTreeSet<(String, String)> = BTreeSet::new();
    let mut inherit_links: BTreeSet<(String, String)> = BTreeSet::new();

    for edge in snapshot.edges() {
        if edge.confidence == Confidence::Unresolved {
            continue;
        }
        let (Some(from), Some(to)) = (snapshot.unit(edge.from.as_str()), edge.to.as_ref().and_then(|t| snapshot.unit(t.as_str())))
        else {
            continue;
        };
        match edge.kind {
            EdgeKind::Imports => {
                if let (Some(a), Some(b)) = (module_of(snapshot, from), module_of(snapshot, to)) {
                    if a != b {
                        import_links.insert((a, b));
                    }
                }
            }
            EdgeKind::Inherits if from.id != to.id => {
                inherit_links.insert((from.id.to_string(), to.id.to_string()));
            }
            _ => {}
        }
    }

    let mut found = Vec::new();
    found.extend(strongly_connected(CycleKind::Import, &import_links));
    found.extend(strongly_connected(CycleKind::Inheritance, &inherit_links));
    found.sort();
    found
}

fn strongly_connected(kind: CycleKind, links: &BTreeSet<(String, String)>) -> Vec<Cycle> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    let mut node = |graph: &mut DiGraph<String, ()>, name: &String| {
        *index.entry(name.clone()).or_insert_with(|| graph.add_node(name.clone()))
    };
    for (from, to) in links {
        let a = node(&mut graph, from);
        let b = node(&mut graph, to);
        graph.add_edge(a, b, ());
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .map(|scc| {
            let mut members: Vec<String> = scc.iter().filter_map(|&idx| graph.node_weight(idx).cloned()).collect();
            members.sort();
            Cycle { kind, members }
        })
        .collect()
}
