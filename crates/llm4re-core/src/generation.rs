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

use tracing::{debug, instrument};

use crate::chain::EvaluationChain;
use crate::errors::Llm4ReResult;
use crate::evaluation::Evaluation;
use crate::evaluator::{ChainInput, Evaluator};
use crate::helpers::format_dict;

/// How a model produces its answer: one prompt, or a chain of prompts
pub enum Approach {
    SingleStep,
    Chain(EvaluationChain),
}

impl Approach {
    async fn run(&self, evaluator: &Evaluator, input: ChainInput) -> Llm4ReResult<Evaluation> {
        match self {
            Approach::SingleStep => evaluator.evaluate(&input.as_query()).await,
            Approach::Chain(chain) => chain.invoke(evaluator, &input).await,
        }
    }
}

struct Judge {
    evaluator: Evaluator,
    approach: Approach,
}

/// Evaluates requirements and optionally has a second model judge the result
pub struct ResponseGenerator {
    evaluator: Evaluator,
    approach: Approach,
    judge: Option<Judge>,
}

impl ResponseGenerator {
    pub fn new(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            approach: Approach::SingleStep,
            judge: None,
        }
    }

    pub fn with_chain(mut self, chain: EvaluationChain) -> Self {
        self.approach = Approach::Chain(chain);
        self
    }

    /// Judge evaluations with `judge`, single-step or through `chain`
    pub fn with_judge(mut self, judge: Evaluator, chain: Option<EvaluationChain>) -> Self {
        let approach = chain.map_or(Approach::SingleStep, Approach::Chain);
        self.judge = Some(Judge {
            evaluator: judge,
            approach,
        });
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    /// Evaluate `requirement`; the rating of a valid evaluation is parsed.
    #[instrument(skip_all)]
    pub async fn generate(&self, requirement: &str) -> Llm4ReResult<Evaluation> {
        let mut evaluation = self
            .approach
            .run(&self.evaluator, ChainInput::from(requirement))
            .await?;
        let rating = evaluation.parse_rating();
        debug!(kind = %evaluation.kind(), ?rating, "Generated evaluation");
        Ok(evaluation)
    }

    /// Judge a stored evaluation. Without a configured judge the evaluation
    /// is returned unchanged.
    #[instrument(skip_all)]
    pub async fn judge(&self, evaluation: Evaluation) -> Llm4ReResult<Evaluation> {
        let Some(judge) = &self.judge else {
            return Ok(evaluation);
        };
        let input = match &judge.approach {
            Approach::SingleStep => ChainInput::Requirement(format_dict(evaluation.content(), false)),
            Approach::Chain(_) => ChainInput::Evaluation(evaluation),
        };
        let mut judgement = judge.approach.run(&judge.evaluator, input).await?;
        judgement.parse_rating();
        debug!(kind = %judgement.kind(), "Generated judgement");
        Ok(judgement)
    }

    /// Evaluate `requirement` and judge the result
    pub async fn generate_judged(&self, requirement: &str) -> Llm4ReResult<(Evaluation, Evaluation)> {
        let evaluation = self.generate(requirement).await?;
        let judgement = self.judge(evaluation.clone()).await?;
        Ok((evaluation, judgement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EvaluationChainKind;
    use crate::config::EvaluatorSettings;
    use crate::evaluation::EvalWrapper;
    use crate::llm::{Message, MockLlmClient};
    use crate::metrics::Metric;
    use crate::store::InMemoryTemplateStore;
    use mockall::Sequence;
    use serde_json::json;
    use std::sync::Arc;

    const METRICS: [Metric; 2] = [Metric::Atomicity, Metric::Precision];

    fn general_answer() -> serde_json::Value {
        json!({
            "requirement": "R",
            "evaluation": {
                "Atomicity": {"rating": 5, "comment": "single action"},
                "Precision": {"rating": 2, "comment": "vague"}
            },
            "proposed_requirement": {"text": "R2", "justification": "precise"}
        })
    }

    fn evaluator(llm: MockLlmClient, settings: EvaluatorSettings) -> Evaluator {
        let store = InMemoryTemplateStore::builtin().unwrap();
        Evaluator::new(Arc::new(llm), Arc::new(store), settings).with_metrics(METRICS.to_vec())
    }

    #[tokio::test]
    async fn test_single_step_generation_parses_rating() {
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        llm.expect_invoke().times(1).returning(|_| Ok(general_answer()));

        let generator = ResponseGenerator::new(evaluator(llm, EvaluatorSettings::default()));
        let evaluation = generator.generate("R").await.unwrap();
        assert!(evaluation.is_complete(), "{}", evaluation);
        assert!(evaluation.get("overall_rating").is_some());
        assert!(!generator.has_judge());
    }

    #[tokio::test]
    async fn test_basic_chain_generation() {
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        llm.expect_reset_memory().times(1).returning(|| ());
        let mut seq = Sequence::new();
        for rating in [4, 2] {
            llm.expect_invoke()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(json!({"requirement": "R", "rating": rating, "justification": "why"})));
        }
        llm.expect_invoke()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json!({"requirement": "R", "proposed_requirement": "R2", "justification": "better"})));

        let generator = ResponseGenerator::new(evaluator(llm, EvaluatorSettings::default()))
            .with_chain(EvaluationChainKind::Basic.build(&METRICS));
        let evaluation = generator.generate("R").await.unwrap();
        assert!(evaluation.is_complete(), "{}", evaluation);
        assert_eq!(evaluation.content()["evaluation"]["Precision"]["rating"], 2);
        assert_eq!(evaluation.get_proposed_requirement(None).as_deref(), Some("R2"));
        assert!(evaluation.get("overall_rating").is_some());
    }

    #[tokio::test]
    async fn test_single_step_judge_sees_rendered_evaluation() {
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        llm.expect_invoke().times(1).returning(|messages: &[Message]| {
            let user = &messages.last().unwrap().content;
            assert!(user.contains("\"requirement\": \"R\""));
            Ok(json!({
                "original_requirement": "R",
                "evaluation": {
                    "Assessment_of_Atomicity_Evaluation": {"rating": 5},
                    "Assessment_of_Precision_Evaluation": {"rating": 3}
                },
                "Assessment_of_proposed_requirement": {"rating": 4}
            }))
        });

        let generator = ResponseGenerator::new(evaluator(MockLlmClient::new(), EvaluatorSettings::default()))
            .with_judge(evaluator(llm, EvaluatorSettings::judge()), None);
        let stored = EvalWrapper::general(METRICS.to_vec()).wrap(general_answer(), None);
        let judgement = generator.judge(stored).await.unwrap();
        assert!(judgement.is_valid(), "{}", judgement);
        let overall = judgement
            .get("overall_evaluation_rating")
            .and_then(serde_json::Value::as_f64)
            .unwrap();
        assert!((overall - 0.75).abs() < 1e-9);
    }
}
