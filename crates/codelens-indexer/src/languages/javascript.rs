//! JavaScript parser adapter

use codelens_core::{ParseOutput, SourceFile, UnitKind};

use super::ecmascript;
use crate::adapter::{FragmentInfo, ParserAdapter};
use crate::error::IndexError;
use crate::parser_pool::{Grammar, ParserPool};

pub struct JavaScriptAdapter {
    parser_pool: ParserPool,
}

impl JavaScriptAdapter {
    pub fn new(parser_pool: ParserPool) -> Self {
        Self { parser_pool }
    }
}

impl ParserAdapter for JavaScriptAdapter {
    fn name(&self) -> &str {
        "javascript"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["js", "jsx", "mjs", "cjs"]
    }

    fn parse(&self, file: &SourceFile) -> Result<ParseOutput, IndexError> {
        ecmascript::parse(&self.parser_pool, Grammar::JavaScript, file)
    }

    fn inspect_fragment(&self, source: &str, expected: UnitKind) -> Result<FragmentInfo, IndexError> {
        ecmascript::inspect_fragment(&self.parser_pool, &[Grammar::JavaScript], source, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::create_parser_pool;

    #[test]
    fn test_class_fields_and_callbacks() {
        let adapter = JavaScriptAdapter::new(create_parser_pool());
        let file = SourceFile::new(
            "src/widget.js",
            "src.widget",
            "class Widget extends Base {\n  onClick = (event) => {\n    this.render(event);\n  };\n  render() {}\n}\n\nfunction mount() {\n  document.addEventListener('load', mount);\n}\n",
        );
        let out = adapter.parse(&file).unwrap();
        let ids: Vec<&str> = out.units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["src.widget", "src.widget.Widget", "src.widget.Widget.onClick", "src.widget.Widget.render", "src.widget.mount"]
        );
        let callback = out
            .references
            .iter()
            .find(|r| r.kind == codelens_core::EdgeKind::References)
            .unwrap();
        assert_eq!(callback.text, "mount");
        assert_eq!(callback.from.as_str(), "src.widget.mount");
    }
}
