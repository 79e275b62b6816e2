//! Rule assembler.
//!
//! A hand-written recursive-descent parser over the token stream, in the
//! same spirit as the lexer/parser split this crate is modeled on. Unlike
//! a grammar-based parser, tokens are pulled lazily, one at a time, so that
//! the lexer can be morphed into value mode for exactly the token that
//! follows a string definition's `=` — a single token of lookahead would
//! otherwise tokenize that character in the wrong mode before the assembler
//! ever gets a chance to switch.

use crate::lexer::{LexError, Lexer, Span, Token, ValueToken};
use crate::model::{
    ConditionToken, MetaValue, RuleRecord, Scope, StringDeclaration, StringModifier, StringType,
};
use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;

/// Options controlling the assembler's behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// Capture the verbatim source text of each rule's meta/strings/
    /// condition sections alongside the structured fields.
    pub store_raw_sections: bool,
}

/// Assembler error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("lexer error: {source}")]
    Lexer { span: Span, source: LexError },

    #[error("unexpected token at {span:?}: expected {expected}, found {found}")]
    UnexpectedToken {
        span: Span,
        expected: String,
        found: String,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("rule '{name}' is missing a condition section")]
    MissingCondition { span: Span, name: String },

    #[error("rule '{name}' has an empty tag list after ':'")]
    EmptyTagList { span: Span, name: String },
}

impl ParseError {
    /// The span this error should be reported at, if any.
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::Lexer { span, .. } => Some(*span),
            ParseError::UnexpectedToken { span, .. } => Some(*span),
            ParseError::UnexpectedEof { .. } => None,
            ParseError::MissingCondition { span, .. } => Some(*span),
            ParseError::EmptyTagList { span, .. } => Some(*span),
        }
    }
}

enum Lookahead {
    Empty,
    Filled(Option<(Token, Span)>),
}

/// Parses YARA rule source text into a sequence of `RuleRecord`s.
pub struct YaraParser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
    lookahead: Lookahead,
    previous_span: Span,
    imports: IndexSet<SmolStr>,
    includes: IndexSet<SmolStr>,
    options: ParserOptions,
}

impl<'source> YaraParser<'source> {
    pub fn new(source: &'source str, options: ParserOptions) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
            lookahead: Lookahead::Empty,
            previous_span: Span::new(0, 0),
            imports: IndexSet::new(),
            includes: IndexSet::new(),
            options,
        }
    }

    /// Parse every rule in the source buffer. Import/include statements are
    /// cumulative: once seen, they apply to every rule parsed afterward,
    /// but this state never leaks across separate `YaraParser` instances.
    pub fn parse_all(&mut self) -> Result<Vec<RuleRecord>, ParseError> {
        let mut rules = Vec::new();
        loop {
            match self.peek()? {
                None => break,
                Some(Token::Import) => self.parse_import()?,
                Some(Token::Include) => self.parse_include()?,
                Some(Token::Rule) | Some(Token::Global) | Some(Token::Private) => {
                    rules.push(self.parse_rule()?);
                }
                Some(other) => {
                    let found = format!("{other}");
                    return Err(ParseError::UnexpectedToken {
                        span: self.current_span()?,
                        expected: "import, include, or rule".to_string(),
                        found,
                    });
                }
            }
        }
        Ok(rules)
    }

    // ==================== token cursor ====================

    fn fill(&mut self) -> Result<(), ParseError> {
        if matches!(self.lookahead, Lookahead::Empty) {
            let next = match self.lexer.next_token() {
                None => None,
                Some(Ok(pair)) => Some(pair),
                Some(Err((e, span))) => {
                    return Err(ParseError::Lexer { span, source: e });
                }
            };
            self.lookahead = Lookahead::Filled(next);
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<&Token>, ParseError> {
        self.fill()?;
        match &self.lookahead {
            Lookahead::Filled(Some((t, _))) => Ok(Some(t)),
            Lookahead::Filled(None) => Ok(None),
            Lookahead::Empty => unreachable!("fill() always fills"),
        }
    }

    fn current_span(&mut self) -> Result<Span, ParseError> {
        self.fill()?;
        match &self.lookahead {
            Lookahead::Filled(Some((_, s))) => Ok(*s),
            Lookahead::Filled(None) => Ok(self.previous_span),
            Lookahead::Empty => unreachable!("fill() always fills"),
        }
    }

    fn advance(&mut self) -> Result<(Token, Span), ParseError> {
        self.fill()?;
        let slot = std::mem::replace(&mut self.lookahead, Lookahead::Empty);
        match slot {
            Lookahead::Filled(Some(pair)) => {
                self.previous_span = pair.1;
                Ok(pair)
            }
            Lookahead::Filled(None) => Err(ParseError::UnexpectedEof {
                expected: "a token".to_string(),
            }),
            Lookahead::Empty => unreachable!(),
        }
    }

    fn check(&mut self, expected: &Token) -> Result<bool, ParseError> {
        Ok(self
            .peek()?
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(expected)))
    }

    fn expect(&mut self, expected: Token) -> Result<(Token, Span), ParseError> {
        if self.check(&expected)? {
            self.advance()
        } else {
            let found = match self.peek()? {
                Some(t) => format!("{t}"),
                None => "end of input".to_string(),
            };
            Err(ParseError::UnexpectedToken {
                span: self.current_span()?,
                expected: format!("{expected}"),
                found,
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<SmolStr, ParseError> {
        match self.peek()? {
            Some(Token::Identifier(_)) => match self.advance()?.0 {
                Token::Identifier(name) => Ok(name),
                _ => unreachable!(),
            },
            _ => {
                let found = match self.peek()? {
                    Some(t) => format!("{t}"),
                    None => "end of input".to_string(),
                };
                Err(ParseError::UnexpectedToken {
                    span: self.current_span()?,
                    expected: "identifier".to_string(),
                    found,
                })
            }
        }
    }

    fn expect_string_identifier(&mut self) -> Result<SmolStr, ParseError> {
        match self.peek()? {
            Some(Token::StringIdentifier(_)) => match self.advance()?.0 {
                Token::StringIdentifier(name) => Ok(name),
                _ => unreachable!(),
            },
            _ => {
                let found = match self.peek()? {
                    Some(t) => format!("{t}"),
                    None => "end of input".to_string(),
                };
                Err(ParseError::UnexpectedToken {
                    span: self.current_span()?,
                    expected: "string identifier".to_string(),
                    found,
                })
            }
        }
    }

    fn expect_raw_string_literal(&mut self) -> Result<SmolStr, ParseError> {
        match self.peek()? {
            Some(Token::StringLiteral(_)) => match self.advance()?.0 {
                Token::StringLiteral(s) => Ok(s),
                _ => unreachable!(),
            },
            _ => {
                let found = match self.peek()? {
                    Some(t) => format!("{t}"),
                    None => "end of input".to_string(),
                };
                Err(ParseError::UnexpectedToken {
                    span: self.current_span()?,
                    expected: "string literal".to_string(),
                    found,
                })
            }
        }
    }

    // ==================== import / include ====================

    fn parse_import(&mut self) -> Result<(), ParseError> {
        self.expect(Token::Import)?;
        // Imports retain their surrounding quotes verbatim, matching the
        // original implementation's `'"bingo"' in rule['imports']` check.
        let module = self.expect_raw_string_literal()?;
        self.imports.insert(module);
        Ok(())
    }

    fn parse_include(&mut self) -> Result<(), ParseError> {
        self.expect(Token::Include)?;
        let path = self.expect_raw_string_literal()?;
        self.includes.insert(path);
        Ok(())
    }

    // ==================== rule ====================

    fn parse_rule(&mut self) -> Result<RuleRecord, ParseError> {
        let mut scopes = IndexSet::new();
        loop {
            if self.check(&Token::Global)? {
                self.advance()?;
                scopes.insert(Scope::Global);
            } else if self.check(&Token::Private)? {
                self.advance()?;
                scopes.insert(Scope::Private);
            } else {
                break;
            }
        }

        self.expect(Token::Rule)?;
        let rule_name = self.expect_identifier()?;

        let mut tags = Vec::new();
        if self.check(&Token::Colon)? {
            let colon_span = self.advance()?.1;
            while self.check(&Token::Identifier(SmolStr::default()))? {
                tags.push(self.expect_identifier()?);
            }
            if tags.is_empty() {
                return Err(ParseError::EmptyTagList {
                    span: colon_span,
                    name: rule_name.to_string(),
                });
            }
        }

        self.expect(Token::LBrace)?;

        let mut metadata = IndexMap::new();
        let mut strings = Vec::new();
        let mut condition = Vec::new();
        let mut raw_meta = None;
        let mut raw_strings = None;
        let mut raw_condition = None;
        let body_start = self.previous_span;

        loop {
            if self.check(&Token::Meta)? {
                self.parse_meta_section(&mut metadata, &mut raw_meta)?;
            } else if self.check(&Token::Strings)? {
                self.parse_strings_section(&mut strings, &mut raw_strings)?;
            } else if self.check(&Token::Condition)? {
                self.parse_condition_section(&mut condition, &mut raw_condition)?;
            } else if self.check(&Token::RBrace)? {
                self.advance()?;
                break;
            } else {
                let found = match self.peek()? {
                    Some(t) => format!("{t}"),
                    None => "end of input".to_string(),
                };
                return Err(ParseError::UnexpectedToken {
                    span: self.current_span()?,
                    expected: "meta, strings, condition, or '}'".to_string(),
                    found,
                });
            }
        }

        if condition.is_empty() {
            return Err(ParseError::MissingCondition {
                span: body_start,
                name: rule_name.to_string(),
            });
        }

        Ok(RuleRecord {
            rule_name,
            tags,
            scopes,
            imports: self.imports.clone(),
            includes: self.includes.clone(),
            metadata,
            strings,
            condition,
            raw_meta,
            raw_strings,
            raw_condition,
        })
    }

    fn parse_meta_section(
        &mut self,
        metadata: &mut IndexMap<SmolStr, MetaValue>,
        raw_meta: &mut Option<String>,
    ) -> Result<(), ParseError> {
        self.expect(Token::Meta)?;
        self.expect(Token::Colon)?;
        let start = self.current_span()?.start;

        while !self.check(&Token::Strings)?
            && !self.check(&Token::Condition)?
            && !self.check(&Token::RBrace)?
        {
            let key = self.expect_identifier()?;
            self.expect(Token::Assign)?;
            let value = match self.peek()? {
                Some(Token::True) => {
                    self.advance()?;
                    MetaValue::Boolean(true)
                }
                Some(Token::False) => {
                    self.advance()?;
                    MetaValue::Boolean(false)
                }
                Some(Token::Number(_)) => match self.advance()?.0 {
                    Token::Number(n) => MetaValue::Integer(n),
                    _ => unreachable!(),
                },
                Some(Token::Minus) => {
                    self.advance()?;
                    match self.advance()?.0 {
                        Token::Number(n) => MetaValue::Integer(-n),
                        other => {
                            return Err(ParseError::UnexpectedToken {
                                span: self.previous_span,
                                expected: "number".to_string(),
                                found: format!("{other}"),
                            })
                        }
                    }
                }
                Some(Token::StringLiteral(_)) => match self.advance()?.0 {
                    Token::StringLiteral(raw) => MetaValue::Text(unescape_quoted(&raw)),
                    _ => unreachable!(),
                },
                _ => {
                    let found = match self.peek()? {
                        Some(t) => format!("{t}"),
                        None => "end of input".to_string(),
                    };
                    return Err(ParseError::UnexpectedToken {
                        span: self.current_span()?,
                        expected: "a metadata value".to_string(),
                        found,
                    });
                }
            };
            metadata.insert(key, value);
        }

        let end = self.previous_span.end;
        if self.options.store_raw_sections {
            *raw_meta = Some(self.source[start..end.max(start)].to_string());
        }
        Ok(())
    }

    fn parse_strings_section(
        &mut self,
        strings: &mut Vec<StringDeclaration>,
        raw_strings: &mut Option<String>,
    ) -> Result<(), ParseError> {
        self.expect(Token::Strings)?;
        self.expect(Token::Colon)?;
        let start = self.current_span()?.start;

        while !self.check(&Token::Condition)? && !self.check(&Token::RBrace)? {
            let name = self.expect_string_identifier()?;
            self.expect(Token::Assign)?;

            // The lookahead buffer must be empty here: `expect` consumed the
            // `=` directly off the buffer without refilling it, so the next
            // byte of source has not yet been tokenized in the wrong mode.
            debug_assert!(matches!(self.lookahead, Lookahead::Empty));
            let (value_token, value_span) = match self.lexer.next_value_token() {
                None => {
                    return Err(ParseError::UnexpectedEof {
                        expected: "a string value".to_string(),
                    })
                }
                Some(Ok(pair)) => pair,
                Some(Err((e, span))) => return Err(ParseError::Lexer { span, source: e }),
            };
            self.previous_span = value_span;

            let value = match value_token {
                ValueToken::Text(s) => StringType::Text(s.to_string()),
                ValueToken::Hex(s) => StringType::Hex(s),
                ValueToken::Regex(s) => StringType::Regex(s),
            };

            let mut modifiers = Vec::new();
            loop {
                let modifier = match self.peek()? {
                    Some(Token::Nocase) => StringModifier::Nocase,
                    Some(Token::Wide) => StringModifier::Wide,
                    Some(Token::Ascii) => StringModifier::Ascii,
                    Some(Token::Fullword) => StringModifier::Fullword,
                    Some(Token::Xor) => StringModifier::Xor,
                    _ => break,
                };
                self.advance()?;
                modifiers.push(modifier);
            }

            strings.push(StringDeclaration {
                name,
                value,
                modifiers,
            });
        }

        let end = self.previous_span.end;
        if self.options.store_raw_sections {
            *raw_strings = Some(self.source[start..end.max(start)].to_string());
        }
        Ok(())
    }

    fn parse_condition_section(
        &mut self,
        condition: &mut Vec<ConditionToken>,
        raw_condition: &mut Option<String>,
    ) -> Result<(), ParseError> {
        self.expect(Token::Condition)?;
        self.expect(Token::Colon)?;
        let start = self.current_span()?.start;

        while !self.check(&Token::RBrace)? {
            let (token, _) = self.advance()?;
            condition.push(token);
        }

        let end = self.previous_span.end;
        if self.options.store_raw_sections {
            *raw_condition = Some(self.source[start..end.max(start)].to_string());
        }
        Ok(())
    }
}

/// Resolves escape sequences in a raw quoted-string token (including its
/// surrounding quotes) into the literal text it denotes, for use as a
/// metadata value. String *declarations* keep their raw verbatim form
/// instead — only metadata values are unescaped.
fn unescape_quoted(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                        out.push(byte as char);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetaValue, Scope, StringModifier, StringType};
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Vec<RuleRecord> {
        YaraParser::new(source, ParserOptions::default())
            .parse_all()
            .expect("parse should succeed")
    }

    #[test]
    fn minimal_rule() {
        let rules = parse("rule test { condition: true }");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule_name, "test");
        assert_eq!(rules[0].condition, vec![Token::True]);
    }

    #[test]
    fn scopes_and_tags() {
        let rules = parse("private global rule tagged : alpha beta { condition: true }");
        assert!(rules[0].scopes.contains(&Scope::Private));
        assert!(rules[0].scopes.contains(&Scope::Global));
        assert_eq!(rules[0].tags, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn metadata_values() {
        let rules = parse(
            r#"rule m { meta: a = "text" b = 5 c = true d = false e = -3 strings: $s = "x" condition: $s }"#,
        );
        let meta = &rules[0].metadata;
        assert_eq!(meta["a"], MetaValue::Text("text".to_string()));
        assert_eq!(meta["b"], MetaValue::Integer(5));
        assert_eq!(meta["c"], MetaValue::Boolean(true));
        assert_eq!(meta["d"], MetaValue::Boolean(false));
        assert_eq!(meta["e"], MetaValue::Integer(-3));
    }

    #[test]
    fn meta_text_is_unescaped() {
        let rules = parse(r#"rule m { meta: author = "Andr\x65s" condition: true }"#);
        assert_eq!(
            rules[0].metadata["author"],
            MetaValue::Text("Andres".to_string())
        );
    }

    #[test]
    fn string_declarations_stay_raw() {
        let rules = parse(
            r#"rule s { strings: $a = "hark, a \"string\" here" fullword ascii condition: $a }"#,
        );
        let decl = &rules[0].strings[0];
        assert_eq!(
            decl.value,
            StringType::Text(r#""hark, a \"string\" here""#.to_string())
        );
        assert_eq!(
            decl.modifiers,
            vec![StringModifier::Fullword, StringModifier::Ascii]
        );
    }

    #[test]
    fn hex_and_regex_declarations() {
        let rules = parse(
            r#"rule s {
                strings:
                    $h = { 00 22 44 }
                    $r = /state: (on|off)/ wide
                condition:
                    $h and $r
            }"#,
        );
        assert_eq!(
            rules[0].strings[0].value,
            StringType::Hex("{ 00 22 44 }".to_string())
        );
        assert_eq!(
            rules[0].strings[1].value,
            StringType::Regex("/state: (on|off)/".to_string())
        );
        assert_eq!(rules[0].strings[1].modifiers, vec![StringModifier::Wide]);
    }

    #[test]
    fn imports_are_cumulative_and_retain_quotes() {
        let rules = parse(
            r#"
            import "lib1"
            rule two { condition: true }

            import "lib2"
            rule three { condition: true }
            "#,
        );
        assert!(rules[0].imports.contains("\"lib1\""));
        assert!(!rules[0].imports.contains("\"lib2\""));
        assert!(rules[1].imports.contains("\"lib1\""));
        assert!(rules[1].imports.contains("\"lib2\""));
    }

    #[test]
    fn imports_reset_across_assembler_instances() {
        let mut first = YaraParser::new(
            r#"import "lib1" rule one { condition: true }"#,
            ParserOptions::default(),
        );
        let first_rules = first.parse_all().unwrap();
        assert!(first_rules[0].imports.contains("\"lib1\""));

        let mut second = YaraParser::new("rule two { condition: true }", ParserOptions::default());
        let second_rules = second.parse_all().unwrap();
        assert!(second_rules[0].imports.is_empty());
    }

    #[test]
    fn raw_sections_captured_when_enabled() {
        let mut assembler = YaraParser::new(
            r#"rule r { meta: a = "b" strings: $s = "x" condition: $s }"#,
            ParserOptions {
                store_raw_sections: true,
            },
        );
        let rules = assembler.parse_all().unwrap();
        assert!(rules[0].raw_meta.as_deref().unwrap().contains("a = \"b\""));
        assert!(rules[0]
            .raw_strings
            .as_deref()
            .unwrap()
            .contains("$s = \"x\""));
        assert_eq!(rules[0].raw_condition.as_deref().unwrap(), "$s");
    }

    #[test]
    fn missing_condition_errors() {
        let err = YaraParser::new("rule bad { strings: $a = \"x\" }", ParserOptions::default())
            .parse_all()
            .unwrap_err();
        assert!(matches!(err, ParseError::MissingCondition { .. }));
    }

    #[test]
    fn empty_tag_list_errors() {
        let err = YaraParser::new("rule foo : { condition: true }", ParserOptions::default())
            .parse_all()
            .unwrap_err();
        assert!(matches!(err, ParseError::EmptyTagList { .. }));
    }

    #[test]
    fn nine_hex_pattern_integration() {
        let rules = parse(
            r#"
            rule testName
            {
            strings:
                $a1 = { E2 34 A1 C8 23 FB }
                $a2 = { E2 34 A1 C8 2? FB }
                $a3 = { E2 34 A1 C8 ?? FB }
                $a4 = { E2 34 A1 [6] FB }
                $a5 = { E2 34 A1 [4-6] FB }
                $a6 = { E2 34 A1 [4 - 6] FB }
                $a7 = { E2 34 A1 [-] FB }
                $a8 = { E2 34 A1 [10-] FB }
                $a9 = { E2 23 ( 62 B4 | 56 ) 45 }

            condition:
                any of them
            }
            "#,
        );
        assert_eq!(rules[0].strings.len(), 9);
        for decl in &rules[0].strings {
            match &decl.value {
                StringType::Hex(body) => assert!(body.starts_with("{ E2")),
                other => panic!("expected hex string, got {other:?}"),
            }
        }
    }
}
