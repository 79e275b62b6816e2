//! Parses a small multi-rule YARA source buffer and prints each record.
//!
//! Run with `cargo run --example parse_rules`.

use yara_rule_parser::parse_string;

const SOURCE: &str = r#"
import "pe"

rule detect_example : malware {
    meta:
        author = "example"
        severity = 5

    strings:
        $mz = { 4D 5A }
        $text = "malicious" nocase wide
        $regex = /evil[0-9]+/i

    condition:
        $mz at 0 and any of ($text, $regex) and filesize < 1MB
}
"#;

fn main() {
    let rules = parse_string(SOURCE).expect("valid YARA source");
    for rule in &rules {
        println!("rule {}", rule.rule_name);
        println!("  tags: {:?}", rule.tags);
        println!("  imports: {:?}", rule.imports);
        println!("  metadata: {:?}", rule.metadata);
        println!("  strings: {} declared", rule.strings.len());
        println!("  condition: {} tokens", rule.condition.len());
    }
}
