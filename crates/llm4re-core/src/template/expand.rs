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

//! Placeholder substitution for repeated sections

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::helpers::double_new_lines;

pub const GENERAL_VARS: [&str; 2] = ["m_id", "m_name"];
pub const METRIC_VARS: [&str; 4] = ["m_id", "m_name", "m_definition", "m_rating"];
pub const ONE_SHOT_VARS: [&str; 4] = ["os_id", "os_rating", "os_req", "os_eval"];
pub const CHAIN_CONTEXT_VARS: [&str; 6] = ["cc_id", "cc_metric", "cc_req", "cc_eval", "cc_prop", "cc_just"];

/// Placeholder values of one expanded item, in declaration order
pub type Variables = Vec<(&'static str, String)>;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"))
}

/// Replace each `{name}` whose name is mapped; unmapped placeholders stay as they are.
///
/// Substituted values are not scanned again.
pub fn process_variables(template: &str, variables: &[(&str, String)]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            variables
                .iter()
                .find(|(key, _)| *key == name)
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.clone())
        })
        .into_owned()
}

/// One substituted copy of `section` per item, joined with a blank line.
///
/// `mapping` receives the 0-based position of the item.
pub fn expand<T, F>(section: &str, items: &[T], mut mapping: F) -> String
where
    F: FnMut(usize, &T) -> Variables,
{
    let blocks: Vec<String> = items
        .iter()
        .enumerate()
        .map(|(i, item)| process_variables(section, &mapping(i, item)))
        .collect();
    double_new_lines(&blocks)
}
