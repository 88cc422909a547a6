/*
Copyright 2024, Zep Software, Inc.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! String helpers shared by template processing and evaluation

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

fn non_word_regex() -> &'static Regex {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    NON_WORD.get_or_init(|| Regex::new(r"\W+").expect("valid regex"))
}

/// Lowercase a string and collapse every run of non-word characters into one space.
pub fn normalize_string(s: &str) -> String {
    non_word_regex()
        .replace_all(s, " ")
        .trim()
        .to_lowercase()
}

/// Indented (4 spaces) JSON rendering of a value, keys in insertion order.
///
/// With `escape_brackets` every curly brace is doubled so the text survives a
/// later placeholder substitution pass.
pub fn format_dict(value: &Value, escape_brackets: bool) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    let json = match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => value.to_string(),
    };
    if escape_brackets {
        json.replace('{', "{{").replace('}', "}}")
    } else {
        json
    }
}

/// Join the non-empty items with `separator`, indenting and wrapping each one.
pub fn format_str_list<S, F>(items: &[S], separator: &str, item_wrapper: F, indent: usize) -> String
where
    S: AsRef<str>,
    F: Fn(&str) -> String,
{
    items
        .iter()
        .map(AsRef::as_ref)
        .filter(|item| !item.is_empty())
        .map(|item| format!("{}{}", " ".repeat(indent), item_wrapper(item)))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Join the non-empty items with one blank line between them.
pub fn double_new_lines<S: AsRef<str>>(items: &[S]) -> String {
    format_str_list(items, "\n\n", str::to_string, 0)
}

/// Render items as a `- ` bullet list.
pub fn bullet_points<S: AsRef<str>>(items: &[S], indent: usize) -> String {
    format_str_list(items, "\n", |item| format!("- {}", item), indent)
}

/// JSON type name used in diagnostics
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_string() {
        assert_eq!(
            normalize_string("  The system SHALL log-in users!  "),
            "the system shall log in users"
        );
        assert_eq!(
            normalize_string("The system shall log in users"),
            normalize_string("the system, shall: log in users.")
        );
    }

    #[test]
    fn test_format_dict() {
        let value = json!({"b": 1, "a": {"c": "x"}});
        let plain = format_dict(&value, false);
        assert_eq!(plain, "{\n    \"b\": 1,\n    \"a\": {\n        \"c\": \"x\"\n    }\n}");

        let escaped = format_dict(&value, true);
        assert!(escaped.starts_with("{{\n"));
        assert!(escaped.ends_with("}}\n}}"));
    }

    #[test]
    fn test_double_new_lines_skips_empty() {
        assert_eq!(double_new_lines(&["a", "", "b"]), "a\n\nb");
        let none: [&str; 0] = [];
        assert_eq!(double_new_lines(&none), "");
    }

    #[test]
    fn test_bullet_points() {
        assert_eq!(bullet_points(&["one", "two"], 2), "  - one\n  - two");
    }
}
