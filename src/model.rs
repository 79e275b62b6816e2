//! Data model for a parsed YARA rule.
//!
//! A `RuleRecord` is a flat, structured representation of one rule: name,
//! scopes, tags, accumulated imports/includes, metadata, string
//! declarations, and the condition as a token stream. There is
//! deliberately no condition AST here — downstream evaluation is out of
//! scope, and the token stream is the structure this crate promises.

use crate::lexer::Token;
use indexmap::{IndexMap, IndexSet};
use smol_str::SmolStr;

/// A rule-level scope modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Private,
}

/// A parsed `meta:` value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// Unescaped text (surrounding quotes removed, escape sequences resolved).
    Text(String),
    Integer(i64),
    Boolean(bool),
}

/// The kind of a string declaration, carrying its verbatim value.
#[derive(Debug, Clone, PartialEq)]
pub enum StringType {
    /// Verbatim quoted text, including the surrounding quotes.
    Text(String),
    /// Verbatim hex-string body, `{ ... }`, whitespace-normalized.
    Hex(String),
    /// Verbatim regex literal, `/pattern/flags`.
    Regex(String),
}

/// A string modifier keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringModifier {
    Nocase,
    Wide,
    Ascii,
    Fullword,
    Xor,
}

/// A single `$name = value modifiers...` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct StringDeclaration {
    pub name: SmolStr,
    pub value: StringType,
    pub modifiers: Vec<StringModifier>,
}

/// One token of the condition's flat token stream. Reuses the lexer's
/// `Token` type directly — the condition grammar is a strict subset of the
/// tokens the lexer already produces, and this crate does not build a
/// separate AST for it.
pub type ConditionToken = Token;

/// A fully parsed rule.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleRecord {
    pub rule_name: SmolStr,
    pub tags: Vec<SmolStr>,
    pub scopes: IndexSet<Scope>,
    pub imports: IndexSet<SmolStr>,
    pub includes: IndexSet<SmolStr>,
    pub metadata: IndexMap<SmolStr, MetaValue>,
    pub strings: Vec<StringDeclaration>,
    pub condition: Vec<ConditionToken>,
    pub raw_meta: Option<String>,
    pub raw_strings: Option<String>,
    pub raw_condition: Option<String>,
}
