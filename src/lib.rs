//! yara-rule-parser
//!
//! A lexer and rule assembler for YARA rule source text.
//!
//! This crate provides:
//! - **Lexer**: tokenizes YARA rule source using Logos, switching between a
//!   default mode and a value-only mode to resolve the `/` and `{`
//!   ambiguities context-sensitively.
//! - **Assembler**: a hand-written recursive-descent parser that turns the
//!   token stream into [`RuleRecord`]s. The condition is deliberately left
//!   as a flat token stream rather than an expression tree — evaluating
//!   conditions is out of scope for this crate.
//!
//! # Example
//!
//! ```
//! use yara_rule_parser::parse_string;
//!
//! let source = r#"
//!     rule example {
//!         strings:
//!             $a = "test"
//!         condition:
//!             $a
//!     }
//! "#;
//!
//! let rules = parse_string(source).unwrap();
//! assert_eq!(rules[0].rule_name, "example");
//! ```
//!
//! # Architecture
//!
//! 1. **Character source** (`source.rs`): line/column resolution for spans.
//! 2. **Lexer** (`lexer.rs`): Logos-driven tokenization with a value-mode
//!    sublexer for hex strings and regex literals.
//! 3. **Data model** (`model.rs`): the structured record types a parse
//!    produces.
//! 4. **Assembler** (`parser.rs`): the recursive-descent parser.

pub mod lexer;
pub mod model;
pub mod parser;
pub mod source;

pub use lexer::{LexError, Lexer, Span, SpannedToken, Token, ValueToken};
pub use model::{
    ConditionToken, MetaValue, RuleRecord, Scope, StringDeclaration, StringModifier, StringType,
};
pub use parser::{ParserOptions, YaraParser};
pub use source::SourceMap;

use miette::Diagnostic;

/// Top-level parse error, carrying the source text needed to render a
/// [`miette::Diagnostic`] snippet for the first error encountered.
#[derive(Debug, Clone, thiserror::Error, Diagnostic)]
#[error("{inner}")]
pub struct ParseError {
    #[source]
    inner: parser::ParseError,

    #[source_code]
    src: String,

    #[label("{inner}")]
    span: Option<miette::SourceSpan>,
}

impl ParseError {
    fn new(inner: parser::ParseError, source: &str) -> Self {
        let span = inner.span().map(miette::SourceSpan::from);
        Self {
            inner,
            src: source.to_string(),
            span,
        }
    }

    /// Line/column of the error, 1-based, if the error has an associated span.
    pub fn line_col(&self, source: &str) -> Option<(usize, usize)> {
        let span = self.inner.span()?;
        Some(SourceMap::new(source).line_col(source, span.start))
    }
}

/// Parse every rule in a YARA source buffer, using default options.
///
/// Returns the first error encountered, with line and column recoverable
/// via [`ParseError::line_col`].
pub fn parse_string(source: &str) -> Result<Vec<RuleRecord>, ParseError> {
    parse_string_with_options(source, ParserOptions::default())
}

/// Parse every rule in a YARA source buffer, with explicit options.
pub fn parse_string_with_options(
    source: &str,
    options: ParserOptions,
) -> Result<Vec<RuleRecord>, ParseError> {
    YaraParser::new(source, options)
        .parse_all()
        .map_err(|e| ParseError::new(e, source))
}

/// Tokenize YARA source code without assembling rules.
///
/// Returns a lexer yielding default-mode tokens with span information; this
/// never switches into value mode, so hex strings and regex literals inside
/// string definitions are not recognized as single tokens here (the same
/// trade-off the assembler's lazy-token design exists to avoid).
pub fn tokenize(source: &str) -> Lexer<'_> {
    Lexer::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_minimal_rule() {
        let rules = parse_string("rule test { condition: true }").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule_name, "test");
    }

    #[test]
    fn error_reports_line_and_column() {
        let source = "rule test {\n  condition: ???\n}";
        let err = parse_string(source).unwrap_err();
        let (line, _col) = err.line_col(source).expect("error should have a span");
        assert_eq!(line, 2);
    }

    #[test]
    fn store_raw_sections_option() {
        let source = r#"rule r { strings: $a = "x" condition: $a }"#;
        let rules = parse_string_with_options(
            source,
            ParserOptions {
                store_raw_sections: true,
            },
        )
        .unwrap();
        assert!(rules[0].raw_strings.is_some());
        assert!(rules[0].raw_meta.is_none());
    }

    #[test]
    fn multi_rule_source() {
        let source = r#"
            rule FirstRule {
                meta:
                    author = "Andres Iniesta"
                    date = "2015-01-01"
                strings:
                    $a = "hark, a \"string\" here" fullword ascii
                    $b = { 00 22 44 66 88 aa cc ee }
                condition:
                    all of them
            }

            import "bingo"
            import "bango"
            rule SecondRule : aTag {
                meta:
                    author = "Ivan Rakitic"
                    date = "2015-02-01"
                strings:
                    $x = "hi"
                    $y = /state: (on|off)/ wide
                    $z = "bye"
                condition:
                    for all of them : ( # > 2 )
            }

            rule ThirdRule {condition: true}
        "#;

        let rules = parse_string(source).unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(
            rules[0].metadata["author"],
            MetaValue::Text("Andres Iniesta".to_string())
        );
        assert_eq!(rules[1].imports.len(), 2);
        assert!(rules[0].imports.is_empty());
    }
}
