//! End-to-end scenarios for the public `parse_string` entry point.
//!
//! These exercise the worked scenarios from the rule-parsing specification
//! against the whole pipeline (lexer + assembler + raw-section capture),
//! rather than any single module in isolation.

use yara_rule_parser::{
    parse_string, parse_string_with_options, MetaValue, ParserOptions, StringType,
};

const THREE_RULES: &str = r#"
rule FirstRule {
    meta:
        author = "Andrés Iniesta"
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

rule ThirdRule {condition: uint32(0) == 0xE011CFD0}
"#;

#[test]
fn three_sequential_rules_with_intervening_imports() {
    let rules = parse_string(THREE_RULES).expect("valid source");
    assert_eq!(rules.len(), 3);

    assert_eq!(rules[0].rule_name, "FirstRule");
    assert_eq!(
        rules[0].metadata["author"],
        MetaValue::Text("Andrés Iniesta".to_string())
    );
    let string_names: Vec<&str> = rules[0].strings.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(string_names, vec!["$a", "$b"]);
    assert!(rules[0].imports.is_empty());

    for rule in &rules[1..] {
        assert!(rule.imports.contains("\"bingo\""));
        assert!(rule.imports.contains("\"bango\""));
    }
}

#[test]
fn imports_do_not_leak_across_separate_parse_calls() {
    let first = parse_string("rule only_one { condition: true }").unwrap();
    assert!(first[0].imports.is_empty());

    let second = parse_string(
        r#"
        import "lib"
        rule two { condition: true }
        "#,
    )
    .unwrap();
    assert!(second[0].imports.contains("\"lib\""));

    // A fresh call on source with no imports must not see "lib" again.
    let third = parse_string("rule three { condition: true }").unwrap();
    assert!(third[0].imports.is_empty());
}

#[test]
fn nine_hex_strings_with_wildcards_and_jumps_all_parse() {
    let source = r#"
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
    "#;

    let rules = parse_string(source).expect("valid source");
    assert_eq!(rules[0].strings.len(), 9);
    for decl in &rules[0].strings {
        match &decl.value {
            StringType::Hex(body) => assert!(body.starts_with("{ E2")),
            other => panic!("expected a hex string, got {other:?}"),
        }
    }
}

#[test]
fn regex_with_trailing_modifiers_and_inline_comment() {
    let source = r#"
    rule r {
        strings:
            $a4 = /abc123 \d\/ afterspace/im nocase // trailing comment
        condition:
            $a4
    }
    "#;

    let rules = parse_string(source).expect("valid source");
    let decl = &rules[0].strings[0];
    assert_eq!(
        decl.value,
        StringType::Regex(r"/abc123 \d\/ afterspace/im".to_string())
    );
    assert_eq!(
        decl.modifiers,
        vec![yara_rule_parser::StringModifier::Nocase]
    );
}

#[test]
fn scopes_collapse_duplicates_and_tags_preserve_order() {
    let rules = parse_string("global private rule seven { condition: true }").unwrap();
    assert_eq!(rules[0].scopes.len(), 2);

    let rules = parse_string("rule twelve : tag1 tag2 { condition: true }").unwrap();
    assert_eq!(rules[0].tags, vec!["tag1".to_string(), "tag2".to_string()]);
}

#[test]
fn raw_condition_present_without_meta_or_strings() {
    let rules = parse_string_with_options(
        "rule r { condition: true }",
        ParserOptions {
            store_raw_sections: true,
        },
    )
    .unwrap();

    assert_eq!(rules[0].raw_condition.as_deref(), Some("true"));
    assert!(rules[0].raw_meta.is_none());
    assert!(rules[0].raw_strings.is_none());
}

#[test]
fn rule_count_matches_top_level_rule_declarations() {
    let rules = parse_string(THREE_RULES).unwrap();
    assert_eq!(rules.len(), 3);
    for rule in &rules {
        assert!(!rule.rule_name.is_empty());
        assert!(!rule.condition.is_empty());
    }
}
