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

//! Turns a raw template into a (system prompt, user prompt) pair

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::expand::{expand, Variables};
use super::sections::{get_sections, process_section, remove_comments, try_process_section, SectionKind};
use crate::chain::ChainLinkOutput;
use crate::config::PromptVersions;
use crate::errors::Llm4ReResult;
use crate::helpers::{bullet_points, format_dict};
use crate::metrics::Metric;
use crate::store::{is_judge_examples, DescriptionKind, TemplateStore};

pub const QUERY_PLACEHOLDER: &str = "{query}";
pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const INVALID_EVALUATION: &str = "error: invalid evaluation";
pub const NO_PROPOSAL: &str = "no proposal";
pub const NO_JUSTIFICATION: &str = "no justification";
pub const DEFAULT_CONTEXT_METRIC: &str = "Evaluation";

const RATING_LEVELS: [&str; 3] = ["Poor", "Average", "Excellent"];

/// Processed prompts. `user` still holds the runtime placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptParts {
    pub system: Option<String>,
    pub user: String,
}

impl PromptParts {
    /// Substitute the runtime placeholders of the user prompt.
    pub fn render_user(&self, query: &str, context: Option<&str>) -> String {
        render_prompt(&self.user, query, context)
    }
}

/// Inputs of one processing pass
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub metrics: &'a [Metric],
    pub step: Option<usize>,
    pub n_shots: usize,
    pub use_retrieval: bool,
    pub versions: &'a PromptVersions,
    pub prev_outputs: &'a [ChainLinkOutput],
}

pub struct TemplateProcessor<'a> {
    store: &'a dyn TemplateStore,
}

impl<'a> TemplateProcessor<'a> {
    pub fn new(store: &'a dyn TemplateStore) -> Self {
        Self { store }
    }

    pub fn load_and_process(&self, name: &str, ctx: &TemplateContext<'_>) -> Llm4ReResult<PromptParts> {
        let template = self.store.load_template(name)?;
        self.process_template(&template, ctx)
    }

    /// Comments are stripped, then the metric, few-shot and chain-context
    /// sections are expanded in that order before the user prompt is split off.
    pub fn process_template(&self, template: &str, ctx: &TemplateContext<'_>) -> Llm4ReResult<PromptParts> {
        let template = remove_comments(template);
        let template = self.process_metric_section(&template, ctx)?;
        let template = self.process_few_shots_section(&template, ctx)?;
        let template = process_chain_context_section(&template, ctx.prev_outputs);

        let parts = split_user_prompt(&template);
        let system = parts
            .system
            .map(|s| normalize_newlines(&s))
            .filter(|s| !s.is_empty());
        let user = normalize_newlines(&escape_curly_braces(&parts.user));
        debug!(
            system_len = system.as_ref().map_or(0, String::len),
            user_len = user.len(),
            "Processed template"
        );
        Ok(PromptParts { system, user })
    }

    pub fn process_metric_section(&self, template: &str, ctx: &TemplateContext<'_>) -> Llm4ReResult<String> {
        if get_sections(template, SectionKind::Metric).is_empty() {
            return Ok(template.to_string());
        }
        let described = ctx
            .metrics
            .iter()
            .map(|metric| {
                let definition = self.store.load_metric_description(
                    *metric,
                    DescriptionKind::Metric,
                    ctx.versions.metric_definition,
                )?;
                let rating = self.store.load_metric_description(
                    *metric,
                    DescriptionKind::Rating,
                    ctx.versions.rating_definition,
                )?;
                Ok((*metric, bullet_points(&definition, 0), bullet_points(&rating, 0)))
            })
            .collect::<Llm4ReResult<Vec<_>>>()?;

        Ok(process_section(template, SectionKind::Metric, |content| {
            expand(content, &described, |i, (metric, definition, rating)| {
                vec![
                    ("m_id", ctx.step.unwrap_or(i + 1).to_string()),
                    ("m_name", metric.name().to_string()),
                    ("m_definition", definition.clone()),
                    ("m_rating", rating.clone()),
                ]
            })
        }))
    }

    /// Few-shot sections disappear without shots, become `{context}` in
    /// retrieval mode and otherwise expand the static examples.
    pub fn process_few_shots_section(&self, template: &str, ctx: &TemplateContext<'_>) -> Llm4ReResult<String> {
        try_process_section(template, SectionKind::FewShots, |content| {
            if ctx.n_shots == 0 {
                return Ok(String::new());
            }
            if ctx.use_retrieval {
                return Ok(process_section(content, SectionKind::OneShot, |_| {
                    CONTEXT_PLACEHOLDER.to_string()
                }));
            }
            let name = &ctx.versions.static_few_shots;
            let examples = self.store.load_static_examples(name)?;
            let selected = examples.select(ctx.metrics, ctx.n_shots, !is_judge_examples(name));
            Ok(process_section(content, SectionKind::OneShot, |one_shot| {
                process_one_shot_section(one_shot, &selected, examples.rating_scale, true)
            }))
        })
    }
}

/// Expand a one-shot section over example records.
pub fn process_one_shot_section(section: &str, examples: &[Value], rating_scale: u32, escape: bool) -> String {
    expand(section, examples, |i, example| one_shot_variables(i, example, rating_scale, escape))
}

fn one_shot_variables(i: usize, example: &Value, rating_scale: u32, escape: bool) -> Variables {
    vec![
        ("os_id", (i + 1).to_string()),
        ("os_rating", rating_expression(example, rating_scale).to_string()),
        (
            "os_req",
            example
                .get("requirement")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        ("os_eval", format_dict(example, escape)),
    ]
}

/// Poor / Average / Excellent level of an example.
///
/// Uses the mean of the per-metric ratings when the example carries an
/// `evaluation` object, its own `rating` otherwise.
pub fn rating_expression(example: &Value, rating_scale: u32) -> &'static str {
    let rating = match example.get("evaluation").and_then(Value::as_object) {
        Some(evaluation) => {
            let ratings: Vec<f64> = evaluation
                .values()
                .filter_map(|m| m.get("rating").and_then(Value::as_f64))
                .collect();
            (!ratings.is_empty()).then(|| ratings.iter().sum::<f64>() / ratings.len() as f64)
        }
        None => example.get("rating").and_then(Value::as_f64),
    };
    let Some(rating) = rating.filter(|_| rating_scale > 1) else {
        return RATING_LEVELS[1];
    };
    let level = ((rating - 1.0) * (2.0 / (rating_scale as f64 - 1.0)) + 1.0)
        .round_ties_even()
        .clamp(1.0, 3.0);
    RATING_LEVELS[level as usize - 1]
}

/// Expand chain-context sections over the visible prior outputs.
pub fn process_chain_context_section(template: &str, prev_outputs: &[ChainLinkOutput]) -> String {
    process_section(template, SectionKind::ChainContext, |content| {
        expand(content, prev_outputs, |_, output| chain_context_variables(output))
    })
}

fn chain_context_variables(output: &ChainLinkOutput) -> Variables {
    let evaluation = output.evaluation();
    let (requirement, content) = if evaluation.is_valid() {
        (
            evaluation.get_str("requirement").unwrap_or_default().to_string(),
            evaluation.content().clone(),
        )
    } else {
        (INVALID_EVALUATION.to_string(), evaluation.to_record())
    };
    let proposal = evaluation
        .get_proposed_requirement(Some("requirement"))
        .unwrap_or_else(|| NO_PROPOSAL.to_string());
    let metric = output
        .metrics()
        .first()
        .map_or(DEFAULT_CONTEXT_METRIC, Metric::name);
    let justification = content
        .get("justification")
        .and_then(Value::as_str)
        .unwrap_or(NO_JUSTIFICATION)
        .to_string();

    vec![
        ("cc_id", output.step().to_string()),
        ("cc_metric", metric.to_string()),
        ("cc_req", requirement),
        ("cc_eval", format_dict(&content, true)),
        ("cc_prop", proposal),
        ("cc_just", justification),
    ]
}

/// Split off the first user-prompt section; the rest of the template is the
/// system prompt. Without a user-prompt section everything is user prompt.
pub fn split_user_prompt(template: &str) -> PromptParts {
    match get_sections(template, SectionKind::UserPrompt).into_iter().next() {
        Some(section) => PromptParts {
            system: Some(template.replace(&section.full_match, "")),
            user: section.content,
        },
        None => PromptParts {
            system: None,
            user: template.to_string(),
        },
    }
}

/// Double every lone brace that is not part of `{query}` or `{context}`.
pub fn escape_curly_braces(text: &str) -> String {
    const RESERVED: [&str; 2] = ["query", "context"];

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut out = String::with_capacity(text.len() + 8);
    for (pos, &(i, c)) in chars.iter().enumerate() {
        let prev = pos.checked_sub(1).map(|p| chars[p].1);
        let next = chars.get(pos + 1).map(|&(_, n)| n);
        let double = match c {
            '{' => {
                let rest = &text[i + 1..];
                prev != Some('{')
                    && next != Some('{')
                    && !RESERVED.iter().any(|r| rest.starts_with(&format!("{}}}", r)))
            }
            '}' => {
                let before = &text[..i];
                prev != Some('}')
                    && next != Some('}')
                    && !RESERVED.iter().any(|r| before.ends_with(&format!("{{{}", r)))
            }
            _ => false,
        };
        out.push(c);
        if double {
            out.push(c);
        }
    }
    out
}

fn newlines_regex() -> &'static Regex {
    static NEWLINES: OnceLock<Regex> = OnceLock::new();
    NEWLINES.get_or_init(|| Regex::new(r"\n{3,}").expect("valid newline regex"))
}

/// Collapse 3+ newlines into a blank line and strip surrounding newlines.
pub fn normalize_newlines(text: &str) -> String {
    newlines_regex()
        .replace_all(text, "\n\n")
        .trim_matches('\n')
        .to_string()
}

/// Fill `{query}`/`{context}` and un-double escaped braces in one pass.
///
/// Without a context the `{context}` placeholder is left in place.
pub fn render_prompt(text: &str, query: &str, context: Option<&str>) -> String {
    let mut out = String::with_capacity(text.len() + query.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with("{{") || rest.starts_with("}}") {
            out.push(c);
            rest = &rest[2..];
        } else if rest.starts_with(QUERY_PLACEHOLDER) {
            out.push_str(query);
            rest = &rest[QUERY_PLACEHOLDER.len()..];
        } else if let (true, Some(context)) = (rest.starts_with(CONTEXT_PLACEHOLDER), context) {
            out.push_str(context);
            rest = &rest[CONTEXT_PLACEHOLDER.len()..];
        } else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    out
}
