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

use serde::{Deserialize, Serialize};

use crate::chain::EvaluationChainKind;

pub const DEFAULT_N_SHOTS: usize = 1;
pub const DEFAULT_DESCRIPTION_VERSION: usize = 1;
pub const DEFAULT_STATIC_FEW_SHOTS: &str = "eval_rating_5";
pub const DEFAULT_TEMPLATE: &str = "template_demo";
pub const DEFAULT_JUDGE_TEMPLATE: &str = "judge_general";
pub const DEFAULT_MEMORY_SIZE: usize = 0;

/// Which side of an evaluation a model plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluatorRole {
    #[serde(rename = "evaluator")]
    Evaluator,
    #[serde(rename = "judge")]
    Judge,
}

/// Versions of the static lookup data used to build prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersions {
    pub metric_definition: usize,
    pub rating_definition: usize,
    pub static_few_shots: String,
    pub template: String,
    pub chain: EvaluationChainKind,
}

impl Default for PromptVersions {
    fn default() -> Self {
        Self {
            metric_definition: DEFAULT_DESCRIPTION_VERSION,
            rating_definition: DEFAULT_DESCRIPTION_VERSION,
            static_few_shots: DEFAULT_STATIC_FEW_SHOTS.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            chain: EvaluationChainKind::Basic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorSettings {
    pub n_shots: usize,
    pub use_system_message: bool,
    pub use_retrieval: bool,
    pub structured_output: bool,
    pub role: EvaluatorRole,
    /// Number of exchanges the model remembers; a new session starts once it is used up
    pub memory_size: usize,
    pub versions: PromptVersions,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            n_shots: DEFAULT_N_SHOTS,
            use_system_message: true,
            use_retrieval: false,
            structured_output: true,
            role: EvaluatorRole::Evaluator,
            memory_size: DEFAULT_MEMORY_SIZE,
            versions: PromptVersions::default(),
        }
    }
}

impl EvaluatorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for a judge: no examples and the general judgement template
    pub fn judge() -> Self {
        let mut settings = Self::default().with_n_shots(0);
        settings.role = EvaluatorRole::Judge;
        settings.versions.template = DEFAULT_JUDGE_TEMPLATE.to_string();
        settings
    }

    pub fn with_n_shots(mut self, n_shots: usize) -> Self {
        self.n_shots = n_shots;
        self
    }

    pub fn with_system_message(mut self, use_system_message: bool) -> Self {
        self.use_system_message = use_system_message;
        self
    }

    pub fn with_retrieval(mut self, use_retrieval: bool) -> Self {
        self.use_retrieval = use_retrieval;
        self
    }

    pub fn with_structured_output(mut self, structured_output: bool) -> Self {
        self.structured_output = structured_output;
        self
    }

    pub fn with_memory_size(mut self, memory_size: usize) -> Self {
        self.memory_size = memory_size;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.versions.template = template.into();
        self
    }

    pub fn with_chain(mut self, chain: EvaluationChainKind) -> Self {
        self.versions.chain = chain;
        self
    }

    pub fn with_static_few_shots(mut self, name: impl Into<String>) -> Self {
        self.versions.static_few_shots = name.into();
        self
    }

    pub fn is_judge(&self) -> bool {
        self.role == EvaluatorRole::Judge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = EvaluatorSettings::default();
        assert_eq!(settings.n_shots, 1);
        assert_eq!(settings.memory_size, 0);
        assert_eq!(settings.versions.template, "template_demo");
        assert_eq!(settings.versions.static_few_shots, "eval_rating_5");
        assert_eq!(settings.versions.chain, EvaluationChainKind::Basic);
        assert!(!settings.is_judge());
    }

    #[test]
    fn test_judge_settings() {
        let judge = EvaluatorSettings::judge();
        assert!(judge.is_judge());
        assert_eq!(judge.n_shots, 0);
        assert_eq!(judge.versions.template, "judge_general");
    }
}
