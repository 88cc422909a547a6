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

//! In-memory template store

use std::collections::HashMap;

use super::{description_lines, DescriptionKind, DescriptionTable, StaticExamples, TemplateStore};
use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::metrics::Metric;

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: HashMap<String, String>,
    examples: HashMap<String, StaticExamples>,
    descriptions: HashMap<DescriptionKind, DescriptionTable>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(name.into(), text.into());
        self
    }

    pub fn with_static_examples(mut self, name: impl Into<String>, examples: StaticExamples) -> Self {
        self.examples.insert(name.into(), examples);
        self
    }

    pub fn with_descriptions(mut self, kind: DescriptionKind, table: DescriptionTable) -> Self {
        self.descriptions.insert(kind, table);
        self
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn load_template(&self, name: &str) -> Llm4ReResult<String> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| Llm4ReError::TemplateNotFound {
                name: name.to_string(),
            })
    }

    fn load_static_examples(&self, name: &str) -> Llm4ReResult<StaticExamples> {
        self.examples
            .get(name)
            .cloned()
            .ok_or_else(|| Llm4ReError::StaticExamplesNotFound {
                name: name.to_string(),
            })
    }

    fn load_metric_description(
        &self,
        metric: Metric,
        kind: DescriptionKind,
        version: usize,
    ) -> Llm4ReResult<Vec<String>> {
        description_lines(self.descriptions.get(&kind), metric, kind, version)
    }
}
