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

//! Filesystem-backed template store

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{description_lines, is_judge_examples, DescriptionKind, DescriptionTable, StaticExamples, TemplateStore};
use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::metrics::Metric;

pub const PROMPT_TEMPLATES_DIR: &str = "prompt_templates";
pub const STATIC_FEW_SHOTS_DIR: &str = "static_few_shots";
pub const METRIC_DESCRIPTION_DIR: &str = "metric_description";

/// Reads templates and lookup tables from a data directory:
///
/// ```text
/// <root>/prompt_templates/<name>.md
/// <root>/static_few_shots/{evaluator|judge}/<name>.json
/// <root>/metric_description/{metric|rating}_definitions.json
/// ```
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    root: PathBuf,
}

impl FsTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn template_path(&self, name: &str) -> PathBuf {
        self.root.join(PROMPT_TEMPLATES_DIR).join(format!("{}.md", name))
    }

    fn examples_path(&self, name: &str) -> PathBuf {
        let role = if is_judge_examples(name) { "judge" } else { "evaluator" };
        self.root
            .join(STATIC_FEW_SHOTS_DIR)
            .join(role)
            .join(format!("{}.json", name))
    }

    fn description_path(&self, kind: DescriptionKind) -> PathBuf {
        self.root
            .join(METRIC_DESCRIPTION_DIR)
            .join(format!("{}.json", kind.file_stem()))
    }
}

fn read_or<F>(path: &Path, not_found: F) -> Llm4ReResult<String>
where
    F: FnOnce() -> Llm4ReError,
{
    debug!("Reading {}", path.display());
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => not_found(),
        _ => Llm4ReError::Io(e),
    })
}

impl TemplateStore for FsTemplateStore {
    fn load_template(&self, name: &str) -> Llm4ReResult<String> {
        read_or(&self.template_path(name), || Llm4ReError::TemplateNotFound {
            name: name.to_string(),
        })
    }

    fn load_static_examples(&self, name: &str) -> Llm4ReResult<StaticExamples> {
        let text = read_or(&self.examples_path(name), || Llm4ReError::StaticExamplesNotFound {
            name: name.to_string(),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn load_metric_description(
        &self,
        metric: Metric,
        kind: DescriptionKind,
        version: usize,
    ) -> Llm4ReResult<Vec<String>> {
        let not_found = || Llm4ReError::MetricDescriptionNotFound {
            metric: metric.name().to_string(),
            kind: kind.as_str().to_string(),
            version,
        };
        let text = read_or(&self.description_path(kind), not_found)?;
        let table: DescriptionTable = serde_json::from_str(&text)?;
        description_lines(Some(&table), metric, kind, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(PROMPT_TEMPLATES_DIR)).unwrap();
        fs::create_dir_all(root.join(STATIC_FEW_SHOTS_DIR).join("judge")).unwrap();
        fs::create_dir_all(root.join(METRIC_DESCRIPTION_DIR)).unwrap();
        fs::write(root.join(PROMPT_TEMPLATES_DIR).join("only_query.md"), "{query}").unwrap();
        fs::write(
            root.join(STATIC_FEW_SHOTS_DIR).join("judge").join("judge_rating_10.json"),
            r#"{"Rating_scale": 10, "General": []}"#,
        )
        .unwrap();
        fs::write(
            root.join(METRIC_DESCRIPTION_DIR).join("rating_definitions.json"),
            r#"{"Atomicity": [["1: several needs", "5: one need"]]}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_load_template() {
        let dir = data_dir();
        let store = FsTemplateStore::new(dir.path());
        assert_eq!(store.load_template("only_query").unwrap(), "{query}");
        assert!(matches!(
            store.load_template("missing"),
            Err(Llm4ReError::TemplateNotFound { .. })
        ));
    }

    #[test]
    fn test_judge_examples_directory() {
        let dir = data_dir();
        let store = FsTemplateStore::new(dir.path());
        let examples = store.load_static_examples("judge_rating_10").unwrap();
        assert_eq!(examples.rating_scale, 10);
        assert!(matches!(
            store.load_static_examples("eval_rating_5"),
            Err(Llm4ReError::StaticExamplesNotFound { .. })
        ));
    }

    #[test]
    fn test_load_description() {
        let dir = data_dir();
        let store = FsTemplateStore::new(dir.path());
        let lines = store
            .load_metric_description(Metric::Atomicity, DescriptionKind::Rating, 1)
            .unwrap();
        assert_eq!(lines, vec!["1: several needs", "5: one need"]);
        assert!(store
            .load_metric_description(Metric::Atomicity, DescriptionKind::Metric, 1)
            .is_err());
    }
}
