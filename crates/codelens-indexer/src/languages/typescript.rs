//! TypeScript parser adapter

use codelens_core::{ParseOutput, SourceFile, UnitKind};

use super::ecmascript;
use crate::adapter::{FragmentInfo, ParserAdapter};
use crate::error::IndexError;
use crate::parser_pool::{Grammar, ParserPool};

pub struct TypeScriptAdapter {
    parser_pool: ParserPool,
}

impl TypeScriptAdapter {
    pub fn new(parser_pool: ParserPool) -> Self {
        Self { parser_pool }
    }
}

impl ParserAdapter for TypeScriptAdapter {
    fn name(&self) -> &str {
        "typescript"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["ts", "tsx", "mts", "cts"]
    }

    fn parse(&self, file: &SourceFile) -> Result<ParseOutput, IndexError> {
        let grammar = match Grammar::from_path(&file.path) {
            Some(Grammar::Tsx) => Grammar::Tsx,
            _ => Grammar::TypeScript,
        };
        ecmascript::parse(&self.parser_pool, grammar, file)
    }

    /// Fragments carry no extension; JSX is only tried when plain TypeScript fails.
    fn inspect_fragment(&self, source: &str, expected: UnitKind) -> Result<FragmentInfo, IndexError> {
        ecmascript::inspect_fragment(&self.parser_pool, &[Grammar::TypeScript, Grammar::Tsx], source, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::create_parser_pool;

    #[test]
    fn test_tsx_components() {
        let adapter = TypeScriptAdapter::new(create_parser_pool());
        let file = SourceFile::new(
            "ui/Button.tsx",
            "ui.Button",
            "export function Button(props: Props) {\n  return <button onClick={props.onClick}>{props.label}</button>;\n}\n",
        );
        let out = adapter.parse(&file).unwrap();
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        assert!(out.units.iter().any(|u| u.id.as_str() == "ui.Button.Button" && u.kind == UnitKind::Function));
    }

    #[test]
    fn test_fragment_falls_back_to_tsx() {
        let adapter = TypeScriptAdapter::new(create_parser_pool());
        let info = adapter
            .inspect_fragment("function View() {\n  return <div />;\n}\n", UnitKind::Function)
            .unwrap();
        assert!(info.parses());
        assert_eq!(info.single_definition().map(|d| d.name.as_str()), Some("View"));
    }
}
