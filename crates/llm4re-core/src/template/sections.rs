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

//! Section markers
//!
//! ```text
//! [section/<kind>]:# (free text)
//! ...content...
//! [section/<kind> end]:# (free text)
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    UserPrompt,
    Metric,
    FewShots,
    OneShot,
    ChainContext,
}

impl SectionKind {
    pub const ALL: [SectionKind; 5] = [
        SectionKind::UserPrompt,
        SectionKind::Metric,
        SectionKind::FewShots,
        SectionKind::OneShot,
        SectionKind::ChainContext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::UserPrompt => "user_prompt",
            SectionKind::Metric => "metric",
            SectionKind::FewShots => "few_shots",
            SectionKind::OneShot => "one_shot",
            SectionKind::ChainContext => "chain_context",
        }
    }

    fn regex(&self) -> &'static Regex {
        static REGEXES: OnceLock<HashMap<SectionKind, Regex>> = OnceLock::new();
        let regexes = REGEXES.get_or_init(|| {
            SectionKind::ALL
                .iter()
                .map(|kind| {
                    let name = regex::escape(kind.as_str());
                    let pattern = format!(
                        r"\[section/{name}\]:# \([^\n]+(?s:(.*?))\[section/{name} end\]:# \([^\n]+\n?"
                    );
                    (*kind, Regex::new(&pattern).expect("valid section regex"))
                })
                .collect()
        });
        &regexes[self]
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence of a section: the whole marker span and the text between the markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub full_match: String,
    pub content: String,
}

/// All non-overlapping occurrences of `kind`, in template order.
///
/// Unterminated markers produce no match.
pub fn get_sections(template: &str, kind: SectionKind) -> Vec<Section> {
    kind.regex()
        .captures_iter(template)
        .map(|caps| Section {
            full_match: caps[0].to_string(),
            content: caps.get(1).map_or("", |m| m.as_str()).to_string(),
        })
        .collect()
}

fn comment_regex() -> &'static Regex {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    COMMENT.get_or_init(|| {
        Regex::new(r"(\[(comment|var)/?\w*\]:# \([^\n]+\n?)+").expect("valid comment regex")
    })
}

/// Strip `[comment]:# (...)` and `[var]:# (...)` lines.
pub fn remove_comments(template: &str) -> String {
    comment_regex().replace_all(template, "").into_owned()
}

/// Replace every occurrence of `kind` with `processor(content)`.
pub fn process_section<F>(template: &str, kind: SectionKind, mut processor: F) -> String
where
    F: FnMut(&str) -> String,
{
    match try_process_section::<_, Infallible>(template, kind, |content| Ok(processor(content))) {
        Ok(processed) => processed,
        Err(never) => match never {},
    }
}

/// Fallible variant of [`process_section`]; stops at the first error.
pub fn try_process_section<F, E>(template: &str, kind: SectionKind, mut processor: F) -> Result<String, E>
where
    F: FnMut(&str) -> Result<String, E>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in kind.regex().captures_iter(template) {
        let (Some(whole), content) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        out.push_str(&processor(content.map_or("", |m| m.as_str()))?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "intro\n\
[section/metric]:# (per metric)\n\
## {m_name}\n\
[section/metric end]:# (-)\n\
middle\n\
[section/metric]:# (again)\n\
again {m_id}\n\
[section/metric end]:# (-)\n\
outro";

    #[test]
    fn test_get_sections_finds_all_occurrences() {
        let sections = get_sections(TEMPLATE, SectionKind::Metric);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].content, "\n## {m_name}\n");
        assert!(sections[0].full_match.starts_with("[section/metric]:#"));
        assert!(sections[0].full_match.ends_with("(-)\n"));
        assert_eq!(sections[1].content, "\nagain {m_id}\n");
    }

    #[test]
    fn test_absent_kind_is_noop() {
        assert!(get_sections(TEMPLATE, SectionKind::FewShots).is_empty());
        let processed = process_section(TEMPLATE, SectionKind::FewShots, |_| "x".to_string());
        assert_eq!(processed, TEMPLATE);
    }

    #[test]
    fn test_unterminated_marker_yields_nothing() {
        let template = "[section/metric]:# (open)\nno end here\n";
        assert!(get_sections(template, SectionKind::Metric).is_empty());
    }

    #[test]
    fn test_process_section_replaces_each_span() {
        let processed = process_section(TEMPLATE, SectionKind::Metric, |c| c.trim().to_uppercase());
        assert_eq!(processed, "intro\n## {M_NAME}middle\nAGAIN {M_ID}outro");
    }

    #[test]
    fn test_nested_sections() {
        let template = "[section/few_shots]:# (a)\nhead\n[section/one_shot]:# (b)\n{os_id}\n[section/one_shot end]:# (b)\n[section/few_shots end]:# (a)\n";
        let outer = get_sections(template, SectionKind::FewShots);
        assert_eq!(outer.len(), 1);
        let inner = get_sections(&outer[0].content, SectionKind::OneShot);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].content, "\n{os_id}\n");
    }

    #[test]
    fn test_remove_comments() {
        let template = "[comment]:# (hidden)\n[var]:# (m_id)\n[comment/note]:# (also hidden)\nvisible\n[comment]:# (tail)";
        let cleaned = remove_comments(template);
        assert_eq!(cleaned, "visible\n");
        assert_eq!(remove_comments(&cleaned), cleaned);
    }

    #[test]
    fn test_try_process_section_propagates_error() {
        let result: Result<String, String> =
            try_process_section(TEMPLATE, SectionKind::Metric, |_| Err("boom".to_string()));
        assert_eq!(result.unwrap_err(), "boom");
    }
}
