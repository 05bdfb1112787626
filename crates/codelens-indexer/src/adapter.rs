//! Parser adapter trait definition

use codelens_core::{ParseDiagnostic, ParseOutput, SourceFile, UnitKind};

use crate::error::IndexError;

/// One parameter of a function or method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    /// Callers must pass it (no default, not optional, not variadic).
    pub required: bool,
    pub variadic: bool,
}

/// A top-level definition found in a code fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDefinition {
    pub kind: UnitKind,
    pub name: String,
    pub params: Vec<Param>,
}

/// What a standalone piece of code contains, for patch validation.
#[derive(Debug, Clone, Default)]
pub struct FragmentInfo {
    pub definitions: Vec<FragmentDefinition>,
    /// Top-level statements, definitions included; comments are not counted.
    pub statements: usize,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl FragmentInfo {
    pub fn parses(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// The fragment is exactly one definition and nothing else.
    pub fn single_definition(&self) -> Option<&FragmentDefinition> {
        match (self.definitions.as_slice(), self.statements) {
            ([only], 1) => Some(only),
            _ => None,
        }
    }
}

/// Converts source files of one language family into units and raw references.
///
/// Malformed input never fails: adapters return best-effort output with
/// diagnostics. Errors are reserved for the parser pool itself.
pub trait ParserAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supported_extensions(&self) -> &[&str];

    fn parse(&self, file: &SourceFile) -> Result<ParseOutput, IndexError>;

    /// Parse `source` on its own, as code that will replace a unit of kind `expected`.
    fn inspect_fragment(&self, source: &str, expected: UnitKind) -> Result<FragmentInfo, IndexError>;
}

/// Remove the indentation shared by every non-blank line.
pub fn dedent(source: &str) -> String {
    let indent = source
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        match line.get(indent..) {
            Some(rest) => out.push_str(rest),
            None => out.push_str(line.trim_start()),
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedent_keeps_relative_indentation() {
        let text = "    def run(self):\n        return 1\n\n";
        assert_eq!(dedent(text), "def run(self):\n    return 1\n\n");
    }

    #[test]
    fn test_single_definition_requires_one_statement() {
        let def = FragmentDefinition { kind: UnitKind::Function, name: "f".into(), params: vec![] };
        let info = FragmentInfo { definitions: vec![def.clone()], statements: 2, diagnostics: vec![] };
        assert!(info.single_definition().is_none());

        let info = FragmentInfo { definitions: vec![def], statements: 1, diagnostics: vec![] };
        assert_eq!(info.single_definition().map(|d| d.name.as_str()), Some("f"));
    }
}
