//! Validation levels for a replacement unit

use std::fmt;

use codelens_core::{SignaturePolicy, SourceUnit, UnitKind};
use codelens_indexer::{FragmentDefinition, IndexError, Param, ParserAdapter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    Syntax,
    Structure,
    Signature,
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationLevel::Syntax => "syntax",
            ValidationLevel::Structure => "structure",
            ValidationLevel::Signature => "signature",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub level: ValidationLevel,
    pub check: String,
    pub reason: String,
}

impl ValidationFailure {
    pub fn new(level: ValidationLevel, check: &str, reason: impl Into<String>) -> Self {
        ValidationFailure { level, check: check.to_string(), reason: reason.into() }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} check `{}` failed: {}", self.level, self.check, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub failures: Vec<ValidationFailure>,
    /// Incompatible signature changes, whether or not they were accepted.
    pub breaking_changes: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_failure(&self) -> Option<&ValidationFailure> {
        self.failures.first()
    }
}

/// Run the syntax, structure and signature checks for replacing `unit`.
///
/// Later levels only run when the earlier ones pass.
pub fn validate_replacement(
    adapter: &dyn ParserAdapter,
    unit: &SourceUnit,
    old_source: &str,
    new_source: &str,
    policy: SignaturePolicy,
    allow_breaking: bool,
) -> Result<ValidationReport, IndexError> {
    let mut report = ValidationReport::default();

    let info = adapter.inspect_fragment(new_source, unit.kind)?;
    if let Some(diagnostic) = info.diagnostics.first() {
        report.failures.push(ValidationFailure::new(
            ValidationLevel::Syntax,
            "parse",
            format!(
                "{} syntax error(s); first at line {}: {}",
                info.diagnostics.len(),
                diagnostic.line,
                diagnostic.message
            ),
        ));
        return Ok(report);
    }

    if matches!(unit.kind, UnitKind::Module | UnitKind::Block) {
        return Ok(report);
    }

    let Some(new_def) = info.single_definition() else {
        report.failures.push(ValidationFailure::new(
            ValidationLevel::Structure,
            "single_definition",
            format!(
                "expected exactly one {} definition, found {} definition(s) in {} statement(s)",
                unit.kind.as_str(),
                info.definitions.len(),
                info.statements
            ),
        ));
        return Ok(report);
    };
    if new_def.kind != unit.kind {
        report.failures.push(ValidationFailure::new(
            ValidationLevel::Structure,
            "kind",
            format!("replacement is a {}, unit is a {}", new_def.kind.as_str(), unit.kind.as_str()),
        ));
        return Ok(report);
    }

    let old_info = adapter.inspect_fragment(old_source, unit.kind)?;
    let Some(old_def) = old_info.single_definition() else {
        report.warnings.push(format!("could not read the current signature of {}", unit.id));
        return Ok(report);
    };
    report.breaking_changes = breaking_changes(old_def, new_def);
    if report.breaking_changes.is_empty() {
        return Ok(report);
    }

    if allow_breaking {
        report.warnings.extend(report.breaking_changes.iter().map(|c| format!("accepted breaking change: {}", c)));
    } else if policy == SignaturePolicy::Reject {
        report.failures.push(ValidationFailure::new(
            ValidationLevel::Signature,
            "compatible_signature",
            report.breaking_changes.join("; "),
        ));
    } else {
        report.warnings.extend(report.breaking_changes.iter().map(|c| format!("breaking change: {}", c)));
    }
    Ok(report)
}

/// Changes that can break existing callers.
pub fn breaking_changes(old: &FragmentDefinition, new: &FragmentDefinition) -> Vec<String> {
    let mut changes = Vec::new();
    if old.name != new.name {
        changes.push(format!("renamed `{}` to `{}`", old.name, new.name));
    }
    let accepts_any = new.params.iter().any(|p| p.variadic);
    for param in &old.params {
        if !param.variadic && find(&new.params, &param.name).is_none() && !accepts_any {
            changes.push(format!("removed parameter `{}`", param.name));
        }
    }
    for param in new.params.iter().filter(|p| p.required) {
        match find(&old.params, &param.name) {
            Some(old) if old.required => {}
            Some(_) => changes.push(format!("parameter `{}` is now required", param.name)),
            None => changes.push(format!("new required parameter `{}`", param.name)),
        }
    }
    changes
}

fn find<'a>(params: &'a [Param], name: &str) -> Option<&'a Param> {
    params.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, params: &[(&str, bool)]) -> FragmentDefinition {
        FragmentDefinition {
            kind: UnitKind::Function,
            name: name.to_string(),
            params: params.iter().map(|(n, r)| Param { name: n.to_string(), required: *r, variadic: false }).collect(),
        }
    }

    #[test]
    fn test_optional_parameter_is_compatible() {
        let old = def("signup", &[("email", true)]);
        let new = def("signup", &[("email", true), ("notify", false)]);
        assert!(breaking_changes(&old, &new).is_empty());
    }

    #[test]
    fn test_removed_and_required_parameters_break() {
        let old = def("signup", &[("email", true), ("notify", false)]);
        let new = def("signup", &[("email", true), ("notify", true), ("source", true)]);
        assert_eq!(
            breaking_changes(&old, &new),
            vec!["parameter `notify` is now required".to_string(), "new required parameter `source`".to_string()]
        );

        let new = def("register", &[]);
        assert_eq!(
            breaking_changes(&old, &new),
            vec![
                "renamed `signup` to `register`".to_string(),
                "removed parameter `email`".to_string(),
                "removed parameter `notify`".to_string()
            ]
        );
    }
}
