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

//! Templates and lookup tables compiled into the crate

use super::{DescriptionKind, DescriptionTable, InMemoryTemplateStore, StaticExamples};
use crate::errors::Llm4ReResult;

macro_rules! template {
    ($name:literal) => {
        (
            $name,
            include_str!(concat!("../../data/prompt_templates/", $name, ".md")),
        )
    };
}

/// Bundled prompt templates by name
pub const TEMPLATES: &[(&str, &str)] = &[
    template!("template_demo"),
    template!("only_query"),
    template!("successive_approach_r5"),
    template!("evaluation_chain_step"),
    template!("evaluation_chain_step_zero_shot"),
    template!("evaluation_chain_end"),
    template!("evaluation_chain_end_2"),
    template!("judge_general"),
    template!("judge_chain_step"),
    template!("judge_chain_end"),
];

const STATIC_FEW_SHOTS: &[(&str, &str)] = &[(
    "eval_rating_5",
    include_str!("../../data/static_few_shots/evaluator/eval_rating_5.json"),
)];

const METRIC_DEFINITIONS: &str = include_str!("../../data/metric_description/metric_definitions.json");
const RATING_DEFINITIONS: &str = include_str!("../../data/metric_description/rating_definitions.json");

impl InMemoryTemplateStore {
    /// Store holding the bundled templates, descriptions and few-shot sets
    pub fn builtin() -> Llm4ReResult<Self> {
        let mut store = TEMPLATES
            .iter()
            .fold(Self::new(), |store, (name, text)| store.with_template(*name, *text));

        for (name, text) in STATIC_FEW_SHOTS {
            let examples: StaticExamples = serde_json::from_str(text)?;
            store = store.with_static_examples(*name, examples);
        }

        let metric: DescriptionTable = serde_json::from_str(METRIC_DEFINITIONS)?;
        let rating: DescriptionTable = serde_json::from_str(RATING_DEFINITIONS)?;
        Ok(store
            .with_descriptions(DescriptionKind::Metric, metric)
            .with_descriptions(DescriptionKind::Rating, rating))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;
    use crate::store::TemplateStore;

    #[test]
    fn test_builtin_store_loads() {
        let store = InMemoryTemplateStore::builtin().unwrap();
        assert_eq!(store.template_names().count(), TEMPLATES.len());
        assert!(store.load_template("template_demo").unwrap().contains("{query}"));

        let examples = store.load_static_examples("eval_rating_5").unwrap();
        assert_eq!(examples.rating_scale, 5);
        for metric in Metric::ALL {
            assert!(!examples.select(&[metric], 1, true).is_empty(), "{}", metric);
        }
    }

    #[test]
    fn test_builtin_descriptions_cover_all_metrics() {
        let store = InMemoryTemplateStore::builtin().unwrap();
        for metric in Metric::ALL {
            for kind in [DescriptionKind::Metric, DescriptionKind::Rating] {
                let lines = store.load_metric_description(metric, kind, 1).unwrap();
                assert!(!lines.is_empty());
            }
        }
    }
}
