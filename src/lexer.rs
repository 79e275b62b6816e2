//! YARA rule lexer.
//!
//! Tokenizes YARA rule source using Logos for the context-free bulk of the
//! grammar (keywords, identifiers, numbers, punctuation). Three sublanguages
//! are genuinely context-sensitive and cannot be expressed as unconditional
//! Logos patterns: quoted-string escapes, hex-string bodies, and regex
//! literals. Quoted strings are recognized in every mode via a callback that
//! hands off to a manual scanner (`scan_string_literal`); hex strings and
//! regex literals are only legal on the right-hand side of a string
//! definition's `=`, so they live on a second token type (`ValueToken`) that
//! the assembler morphs the lexer into for exactly one token at a time.

use logos::{FilterResult, Logos};
use smol_str::SmolStr;
use std::fmt;

/// Byte-offset span into the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.len().max(1)).into()
    }
}

/// Lexer error types.
#[derive(Debug, Clone, PartialEq, Default, thiserror::Error)]
pub enum LexError {
    #[error("invalid token")]
    #[default]
    InvalidToken,

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unterminated regex literal")]
    UnterminatedRegex,

    #[error("unterminated hex string")]
    UnterminatedHexString,

    #[error("unterminated block comment")]
    UnterminatedComment,

    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),

    #[error("invalid character '{0}' in hex string")]
    InvalidHexCharacter(char),

    #[error("malformed numeric literal: {0}")]
    MalformedNumber(String),
}

/// Default-mode tokens: everything except the value-only sublanguages.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    #[token("rule")]
    Rule,
    #[token("private")]
    Private,
    #[token("global")]
    Global,
    #[token("meta")]
    Meta,
    #[token("strings")]
    Strings,
    #[token("condition")]
    Condition,
    #[token("import")]
    Import,
    #[token("include")]
    Include,

    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("not")]
    Not,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("all")]
    All,
    #[token("any")]
    Any,
    #[token("none")]
    None,
    #[token("of")]
    Of,
    #[token("them")]
    Them,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("at")]
    At,
    #[token("filesize")]
    Filesize,
    #[token("entrypoint")]
    Entrypoint,
    #[token("contains")]
    Contains,
    #[token("icontains")]
    IContains,
    #[token("startswith")]
    StartsWith,
    #[token("istartswith")]
    IStartsWith,
    #[token("endswith")]
    EndsWith,
    #[token("iendswith")]
    IEndsWith,
    #[token("iequals")]
    IEquals,
    #[token("matches")]
    Matches,
    #[token("defined")]
    Defined,

    // Text modifiers (§3 string definition modifier list)
    #[token("nocase")]
    Nocase,
    #[token("wide")]
    Wide,
    #[token("ascii")]
    Ascii,
    #[token("fullword")]
    Fullword,
    #[token("xor")]
    Xor,

    // Operators
    #[token("==")]
    Equal,
    #[token("!=")]
    NotEqual,
    #[token("<=")]
    LessEqual,
    #[token("<<")]
    ShiftLeft,
    #[token("<")]
    LessThan,
    #[token(">=")]
    GreaterEqual,
    #[token(">>")]
    ShiftRight,
    #[token(">")]
    GreaterThan,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("\\")]
    Backslash,
    #[token("%")]
    Percent,
    #[token("&")]
    Ampersand,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token(".")]
    Dot,

    // `/` is division in a condition; `//` and `/*` are comments; a regex
    // literal is only ever recognized via the value-mode sublexer.
    #[token("/*", scan_block_comment)]
    BlockCommentMarker,
    #[token("/")]
    Slash,

    // Delimiters
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,

    // Identifiers and string references
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    Identifier(SmolStr),

    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    #[token("$", |_| SmolStr::new("$"))]
    StringIdentifier(SmolStr),

    #[regex(r"#[a-zA-Z_][a-zA-Z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    #[token("#", |_| SmolStr::new("#"))]
    StringCount(SmolStr),

    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    #[token("@", |_| SmolStr::new("@"))]
    StringOffset(SmolStr),

    #[regex(r"![a-zA-Z_][a-zA-Z0-9_]*", |lex| SmolStr::new(lex.slice()))]
    StringLength(SmolStr),

    // Numbers: decimal, hex (0x), octal (0o), with optional KB/MB suffix.
    #[regex(r"0x[0-9a-fA-F]+", parse_hex_number)]
    #[regex(r"0o[0-7]+", parse_octal_number)]
    #[regex(r"[0-9]+KB", |lex| parse_size(lex.slice(), 1024))]
    #[regex(r"[0-9]+MB", |lex| parse_size(lex.slice(), 1024 * 1024))]
    #[regex(r"[0-9]+", parse_decimal_number)]
    Number(i64),

    // Quoted string literal: recognized everywhere, value is raw and
    // verbatim (surrounding quotes and escape sequences untouched).
    #[token("\"", scan_string_literal)]
    StringLiteral(SmolStr),
}

/// Value-only tokens: only reachable by explicitly morphing the lexer right
/// after consuming a string definition's `=`. `{` always means a hex string
/// here (no competing `LBrace` interpretation), and `/` always starts a
/// regex literal (no competing division interpretation).
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum ValueToken {
    #[token("\"", scan_string_literal_value)]
    Text(SmolStr),

    #[token("{", scan_hex_string)]
    Hex(String),

    #[token("/", scan_regex)]
    Regex(String),
}

fn parse_hex_number(lex: &mut logos::Lexer<Token>) -> Result<i64, LexError> {
    let slice = lex.slice();
    i64::from_str_radix(&slice[2..], 16).map_err(|_| LexError::MalformedNumber(slice.to_string()))
}

fn parse_octal_number(lex: &mut logos::Lexer<Token>) -> Result<i64, LexError> {
    let slice = lex.slice();
    i64::from_str_radix(&slice[2..], 8).map_err(|_| LexError::MalformedNumber(slice.to_string()))
}

fn parse_decimal_number(lex: &mut logos::Lexer<Token>) -> Result<i64, LexError> {
    let slice = lex.slice();
    slice
        .parse()
        .map_err(|_| LexError::MalformedNumber(slice.to_string()))
}

fn parse_size(slice: &str, multiplier: i64) -> Result<i64, LexError> {
    let num_str = &slice[..slice.len() - 2];
    num_str
        .parse::<i64>()
        .map(|n| n * multiplier)
        .map_err(|_| LexError::MalformedNumber(slice.to_string()))
}

fn scan_block_comment(lex: &mut logos::Lexer<Token>) -> FilterResult<(), LexError> {
    let rest = lex.remainder();
    match rest.find("*/") {
        Some(idx) => {
            lex.bump(idx + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(rest.len());
            FilterResult::Error(LexError::UnterminatedComment)
        }
    }
}

/// Scans a quoted-string literal, validating (but not transforming) escape
/// sequences. Returns the number of bytes to consume from `rest` (including
/// the closing quote) on success.
fn scan_raw_string(rest: &str) -> Result<usize, LexError> {
    let mut chars = rest.char_indices();
    loop {
        match chars.next() {
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n' | 'r' | 't' | '\\' | '"')) => {}
                Some((_, 'x')) => {
                    let h1 = chars.next();
                    let h2 = chars.next();
                    let valid = matches!(h1, Some((_, c)) if c.is_ascii_hexdigit())
                        && matches!(h2, Some((_, c)) if c.is_ascii_hexdigit());
                    if !valid {
                        return Err(LexError::InvalidEscape('x'));
                    }
                }
                Some((_, other)) => return Err(LexError::InvalidEscape(other)),
                None => return Err(LexError::UnterminatedString),
            },
            Some((i, '"')) => return Ok(i + 1),
            Some((_, '\n')) | None => return Err(LexError::UnterminatedString),
            _ => {}
        }
    }
}

/// The returned value is the *raw* source slice including the surrounding
/// quotes, per §4.1: "no unescaping is performed."
fn scan_string_literal(lex: &mut logos::Lexer<Token>) -> Result<SmolStr, LexError> {
    let rest = lex.remainder();
    match scan_raw_string(rest) {
        Ok(consumed) => {
            lex.bump(consumed);
            Ok(SmolStr::new(lex.slice()))
        }
        Err(e) => {
            lex.bump(rest.len());
            Err(e)
        }
    }
}

fn scan_string_literal_value(lex: &mut logos::Lexer<ValueToken>) -> Result<SmolStr, LexError> {
    let rest = lex.remainder();
    match scan_raw_string(rest) {
        Ok(consumed) => {
            lex.bump(consumed);
            Ok(SmolStr::new(lex.slice()))
        }
        Err(e) => {
            lex.bump(rest.len());
            Err(e)
        }
    }
}

/// Scans a hex-string body between `{` and the matching `}`, normalizing
/// interior whitespace to single spaces per §3/§4.1. Legal interior
/// characters: hex digits, `?` wildcards, `[`/`]`/`-` jumps, `(`/`)`/`|`
/// alternatives, whitespace.
fn scan_hex_string(lex: &mut logos::Lexer<ValueToken>) -> Result<String, LexError> {
    let rest = lex.remainder();
    let mut end = None;
    for (i, c) in rest.char_indices() {
        match c {
            '}' => {
                end = Some(i);
                break;
            }
            '0'..='9' | 'a'..='f' | 'A'..='F' | '?' | '[' | ']' | '(' | ')' | '|' | '-' => {}
            c if c.is_whitespace() => {}
            other => {
                lex.bump(rest.len());
                return Err(LexError::InvalidHexCharacter(other));
            }
        }
    }
    match end {
        Some(i) => {
            let body = &rest[..i];
            lex.bump(i + 1);
            let mut normalized = String::from("{ ");
            let mut first = true;
            for tok in body.split_whitespace() {
                if !first {
                    normalized.push(' ');
                }
                normalized.push_str(tok);
                first = false;
            }
            normalized.push_str(" }");
            Ok(normalized)
        }
        None => {
            lex.bump(rest.len());
            Err(LexError::UnterminatedHexString)
        }
    }
}

/// Scans a regex literal terminated by the next unescaped `/`, then consumes
/// trailing flag letters greedily (see SPEC_FULL.md §4 for why this isn't
/// restricted to `i`/`s`).
fn scan_regex(lex: &mut logos::Lexer<ValueToken>) -> Result<String, LexError> {
    let rest = lex.remainder();
    let mut chars = rest.char_indices();
    let mut end = None;
    loop {
        match chars.next() {
            Some((_, '\\')) => {
                chars.next();
            }
            Some((i, '/')) => {
                end = Some(i);
                break;
            }
            Some((_, '\n')) | None => break,
            _ => {}
        }
    }
    let end = match end {
        Some(i) => i,
        None => {
            lex.bump(rest.len());
            return Err(LexError::UnterminatedRegex);
        }
    };
    let after = &rest[end + 1..];
    let flags_len: usize = after
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .map(char::len_utf8)
        .sum();
    lex.bump(end + 1 + flags_len);
    Ok(lex.slice().to_string())
}

/// Token paired with its byte-offset span.
#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

impl SpannedToken {
    pub fn new(token: Token, span: Span) -> Self {
        Self { token, span }
    }
}

/// Lexer wrapper that tracks spans and exposes the value-mode sublexer used
/// by the assembler for string definitions.
pub struct Lexer<'source> {
    inner: Option<logos::Lexer<'source, Token>>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Some(Token::lexer(source)),
        }
    }

    /// Pull the next default-mode token. The error arm carries the span of
    /// the offending text, not just the success arm, so callers can report
    /// the actual failure site instead of falling back to a prior token.
    pub fn next_token(&mut self) -> Option<Result<(Token, Span), (LexError, Span)>> {
        let inner = self.inner.as_mut().expect("lexer always present");
        let result = inner.next()?;
        let span = Span::new(inner.span().start, inner.span().end);
        Some(result.map(|t| (t, span)).map_err(|e| (e, span)))
    }

    /// Morph into value mode, pull exactly one token, morph back. Must only
    /// be called when the caller has not already buffered a default-mode
    /// token past this position (i.e. right after consuming `=`).
    pub fn next_value_token(&mut self) -> Option<Result<(ValueToken, Span), (LexError, Span)>> {
        let lex = self.inner.take().expect("lexer always present");
        let mut vlex = lex.morph::<ValueToken>();
        let result = vlex.next();
        let span = result.as_ref().map(|_| vlex.span());
        self.inner = Some(vlex.morph::<Token>());
        result.zip(span).map(|(r, s)| {
            let span = Span::new(s.start, s.end);
            r.map(|t| (t, span)).map_err(|e| (e, span))
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
