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

//! Template store
//!
//! Prompt templates, metric/rating descriptions and static few-shot sets are
//! static lookup tables keyed by name and version.

pub mod builtin;
pub mod fs;
pub mod memory;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::errors::Llm4ReResult;
use crate::metrics::Metric;

pub use fs::FsTemplateStore;
pub use memory::InMemoryTemplateStore;

/// Which description table to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptionKind {
    Metric,
    Rating,
}

impl DescriptionKind {
    pub fn file_stem(&self) -> &'static str {
        match self {
            DescriptionKind::Metric => "metric_definitions",
            DescriptionKind::Rating => "rating_definitions",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptionKind::Metric => "metric",
            DescriptionKind::Rating => "rating",
        }
    }
}

/// Description tables: metric name -> versions -> lines
pub type DescriptionTable = HashMap<String, Vec<Vec<String>>>;

/// A static few-shot set: a rating scale plus example lists keyed by
/// `General` or by metric name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticExamples {
    #[serde(rename = "Rating_scale")]
    pub rating_scale: u32,
    #[serde(flatten)]
    pub sets: HashMap<String, Vec<Value>>,
}

impl StaticExamples {
    /// Pick up to `n_shots` examples for the requested metrics.
    ///
    /// A single metric selects its own example list; several metrics select
    /// the `General` list, whose per-example evaluations are narrowed to the
    /// requested metrics unless `narrow` is false.
    pub fn select(&self, metrics: &[Metric], n_shots: usize, narrow: bool) -> Vec<Value> {
        let single = metrics.len() == 1;
        let key = if single { metrics[0].name() } else { "General" };
        let examples = self
            .sets
            .get(key)
            .map(|list| list.iter().take(n_shots).cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        if single || !narrow {
            return examples;
        }
        examples
            .into_iter()
            .map(|mut example| {
                if let Some(evaluation) = example.get_mut("evaluation").and_then(Value::as_object_mut) {
                    let narrowed: Map<String, Value> = metrics
                        .iter()
                        .filter_map(|m| evaluation.remove(m.name()).map(|e| (m.name().to_string(), e)))
                        .collect();
                    *evaluation = narrowed;
                }
                example
            })
            .collect()
    }
}

/// Whether a few-shot set holds judgements rather than evaluations
pub fn is_judge_examples(name: &str) -> bool {
    name.starts_with("judge_")
}

/// Source of templates and static lookup data
pub trait TemplateStore: Send + Sync {
    /// Raw markdown text of a prompt template
    fn load_template(&self, name: &str) -> Llm4ReResult<String>;

    /// A static few-shot set by file name
    fn load_static_examples(&self, name: &str) -> Llm4ReResult<StaticExamples>;

    /// Description lines of a metric, `version` being 1-based
    fn load_metric_description(
        &self,
        metric: Metric,
        kind: DescriptionKind,
        version: usize,
    ) -> Llm4ReResult<Vec<String>>;
}

pub(crate) fn description_lines(
    table: Option<&DescriptionTable>,
    metric: Metric,
    kind: DescriptionKind,
    version: usize,
) -> Llm4ReResult<Vec<String>> {
    table
        .and_then(|t| t.get(metric.name()))
        .and_then(|versions| version.checked_sub(1).and_then(|i| versions.get(i)))
        .cloned()
        .ok_or_else(|| crate::errors::Llm4ReError::MetricDescriptionNotFound {
            metric: metric.name().to_string(),
            kind: kind.as_str().to_string(),
            version,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn examples() -> StaticExamples {
        serde_json::from_value(json!({
            "Rating_scale": 5,
            "General": [
                {"requirement": "a", "evaluation": {"Atomicity": {"rating": 2}, "Precision": {"rating": 4}}},
                {"requirement": "b", "evaluation": {"Atomicity": {"rating": 5}, "Precision": {"rating": 5}}},
                {"requirement": "c", "evaluation": {"Atomicity": {"rating": 1}, "Precision": {"rating": 1}}}
            ],
            "Atomicity": [
                {"requirement": "d", "rating": 3}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_select_single_metric() {
        let selected = examples().select(&[Metric::Atomicity], 3, true);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0]["requirement"], "d");
    }

    #[test]
    fn test_select_general_narrows_metrics() {
        let selected = examples().select(&[Metric::Precision, Metric::Correctness], 2, true);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0]["evaluation"], json!({"Precision": {"rating": 4}}));

        let untouched = examples().select(&[Metric::Precision, Metric::Correctness], 2, false);
        assert_eq!(untouched[0]["evaluation"]["Atomicity"]["rating"], 2);
    }

    #[test]
    fn test_select_follows_requested_metric_order() {
        let selected = examples().select(&[Metric::Precision, Metric::Atomicity], 1, true);
        let names: Vec<&str> = selected[0]["evaluation"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(names, vec!["Precision", "Atomicity"]);
    }

    #[test]
    fn test_rating_scale_field() {
        assert_eq!(examples().rating_scale, 5);
        assert!(is_judge_examples("judge_rating_10"));
        assert!(!is_judge_examples("eval_rating_5"));
    }

    #[test]
    fn test_description_versions_are_one_based() {
        let mut table = DescriptionTable::new();
        table.insert(
            "Atomicity".to_string(),
            vec![vec!["v1".to_string()], vec!["v2 a".to_string(), "v2 b".to_string()]],
        );
        let lines = description_lines(Some(&table), Metric::Atomicity, DescriptionKind::Metric, 2).unwrap();
        assert_eq!(lines, vec!["v2 a", "v2 b"]);
        assert!(description_lines(Some(&table), Metric::Atomicity, DescriptionKind::Metric, 0).is_err());
        assert!(description_lines(Some(&table), Metric::Precision, DescriptionKind::Rating, 1).is_err());
    }
}
