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

//! Predefined evaluation chains

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use super::chain::EvaluationChain;
use super::link::{ChainLink, ChainLinkOutput, PrevOutputSelector};
use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::evaluation::{EvalWrapper, Evaluation, JudgementKeys};
use crate::evaluator::ChainInput;
use crate::helpers::format_dict;
use crate::metrics::Metric;

const NO_IMPROVEMENT_REQUIRED: &str = "no improvement required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationChainKind {
    /// One step per metric followed by a proposal that sees every step
    #[serde(rename = "basic")]
    Basic,
    /// Like `Basic`, but the proposal only sees metrics rated below their acceptable level
    #[serde(rename = "refined_chain_end")]
    RefinedChainEnd,
    /// Judges a stored general evaluation metric by metric, then its proposal
    #[serde(rename = "judge_chain")]
    JudgeChain,
    /// Single-step general evaluation stored as a retrieval record
    #[serde(rename = "RAG_successive_data")]
    RetrievalSuccessiveData,
    /// Per-metric evaluations stored as one retrieval record
    #[serde(rename = "RAG_iterative_data")]
    RetrievalIterativeData,
}

impl EvaluationChainKind {
    pub const ALL: [EvaluationChainKind; 5] = [
        EvaluationChainKind::Basic,
        EvaluationChainKind::RefinedChainEnd,
        EvaluationChainKind::JudgeChain,
        EvaluationChainKind::RetrievalSuccessiveData,
        EvaluationChainKind::RetrievalIterativeData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationChainKind::Basic => "basic",
            EvaluationChainKind::RefinedChainEnd => "refined_chain_end",
            EvaluationChainKind::JudgeChain => "judge_chain",
            EvaluationChainKind::RetrievalSuccessiveData => "RAG_successive_data",
            EvaluationChainKind::RetrievalIterativeData => "RAG_iterative_data",
        }
    }

    pub fn is_judge(&self) -> bool {
        matches!(self, EvaluationChainKind::JudgeChain)
    }

    pub fn build(&self, metrics: &[Metric]) -> EvaluationChain {
        match self {
            EvaluationChainKind::Basic => basic(metrics),
            EvaluationChainKind::RefinedChainEnd => refined_chain_end(metrics),
            EvaluationChainKind::JudgeChain => judge_chain(metrics),
            EvaluationChainKind::RetrievalSuccessiveData => retrieval_successive_data(metrics),
            EvaluationChainKind::RetrievalIterativeData => retrieval_iterative_data(metrics),
        }
    }
}

impl fmt::Display for EvaluationChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationChainKind {
    type Err = Llm4ReError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Llm4ReError::Config {
                message: format!("unknown evaluation chain: {}", s),
            })
    }
}

/// Per-metric steps, then a proposal that sees every step.
///
/// The steps are folded into a general evaluation whose metric comments are
/// the step justifications; the proposal keeps its justification next to
/// the proposed text.
pub fn basic(metrics: &[Metric]) -> EvaluationChain {
    let steps = ChainLink::new("evaluation_chain_step", EvalWrapper::metric()).iterate_metrics(metrics, true);
    let end = ChainLink::new("evaluation_chain_end", EvalWrapper::proposed_requirement())
        .with_metrics(metrics.to_vec())
        .with_selector(PrevOutputSelector::all());
    let wrapper = EvalWrapper::general(metrics.to_vec());
    (steps | end).with_reducer(move |outputs, input| Ok(fold_steps(&wrapper, outputs, input)))
}

fn fold_steps(wrapper: &EvalWrapper, mut outputs: Vec<ChainLinkOutput>, input: &ChainInput) -> Evaluation {
    let proposal = outputs.pop().map(|o| o.into_evaluation().into_content());
    let mut content = match proposal {
        Some(Value::Object(mut fields)) => {
            let justification = fields.remove("justification").unwrap_or(Value::Null);
            let text = fields.remove("proposed_requirement").unwrap_or(Value::Null);
            fields.insert(
                "proposed_requirement".to_string(),
                json!({"text": text, "justification": justification}),
            );
            fields
        }
        // keep a broken proposal as is so that it fails validation
        Some(other) => return wrapper.wrap(other, input.requirement()),
        None => Map::new(),
    };

    let evaluation: Map<String, Value> = outputs
        .iter()
        .filter_map(|output| {
            let metric = output.metrics().first()?;
            let step = output.evaluation();
            Some((
                metric.name().to_string(),
                json!({
                    "rating": step.get("rating").cloned().unwrap_or(Value::Null),
                    "comment": step.get("justification").cloned().unwrap_or(Value::Null),
                }),
            ))
        })
        .collect();
    content.insert("evaluation".to_string(), Value::Object(evaluation));
    wrapper.wrap(Value::Object(content), input.requirement())
}

/// Like [`basic`], but the proposal only sees the metrics rated below their
/// acceptable level. Without any such metric it is told that no improvement
/// is required.
pub fn refined_chain_end(metrics: &[Metric]) -> EvaluationChain {
    let steps = ChainLink::new("evaluation_chain_step", EvalWrapper::metric()).iterate_metrics(metrics, true);
    let end = ChainLink::new("evaluation_chain_end_2", EvalWrapper::proposed_requirement())
        .with_metrics(metrics.to_vec())
        .with_selector(PrevOutputSelector::predicate(weak_metric_outputs));
    let wrapper = EvalWrapper::general(metrics.to_vec());
    (steps | end).with_reducer(move |outputs, input| Ok(fold_steps(&wrapper, outputs, input)))
}

fn weak_metric_outputs(outputs: &[ChainLinkOutput]) -> Vec<ChainLinkOutput> {
    let weak: Vec<ChainLinkOutput> = outputs
        .iter()
        .filter(|output| {
            let Some(metric) = output.metrics().first() else {
                return false;
            };
            let mut evaluation = output.evaluation().clone();
            matches!(evaluation.parse_rating(), Some(r) if r != 0.0 && r < metric.offset() as f64)
        })
        .cloned()
        .collect();
    if !weak.is_empty() {
        return weak;
    }
    let placeholder = EvalWrapper::metric().wrap(
        json!({
            "requirement": "",
            "rating": 0,
            "justification": NO_IMPROVEMENT_REQUIRED,
            "proposed_requirement": null
        }),
        None,
    );
    vec![ChainLinkOutput::new(placeholder, Vec::new(), 0)]
}

/// Judges a stored general evaluation: one judgement per metric, then one
/// for the proposed requirement.
pub fn judge_chain(metrics: &[Metric]) -> EvaluationChain {
    let steps = ChainLink::new("judge_chain_step", EvalWrapper::metric_judgement())
        .with_input_transform(metric_judge_query)
        .iterate_metrics(metrics, false);
    let end = ChainLink::new("judge_chain_end", EvalWrapper::proposed_requirement_judgement())
        .with_metrics(metrics.to_vec())
        .with_input_transform(proposal_judge_query);
    let wrapper = EvalWrapper::GeneralJudgement {
        metrics: metrics.to_vec(),
        keys: JudgementKeys::Plain,
    };
    (steps | end).with_reducer(move |outputs, input| Ok(fold_judgements(&wrapper, outputs, input)))
}

fn judged_evaluation(input: &ChainInput) -> Llm4ReResult<&Evaluation> {
    match input {
        ChainInput::Evaluation(evaluation) => Ok(evaluation),
        ChainInput::Requirement(_) => Err(Llm4ReError::InvalidInput(
            "judge chains take an evaluation as input".to_string(),
        )),
    }
}

fn metric_judge_query(_: &[ChainLinkOutput], metrics: &[Metric], input: &ChainInput) -> Llm4ReResult<String> {
    let evaluation = judged_evaluation(input)?;
    let metric = metrics
        .first()
        .ok_or_else(|| Llm4ReError::InvalidInput("metric judgement without a metric".to_string()))?;
    let mut metric_eval = evaluation
        .get("evaluation")
        .and_then(|e| e.get(metric.name()))
        .cloned()
        .unwrap_or(Value::Null);
    if let Some(fields) = metric_eval.as_object_mut() {
        if let Some(comment) = fields.remove("comment") {
            fields.insert("justification".to_string(), comment);
        }
    }
    let mut query = Map::new();
    query.insert(
        "requirement".to_string(),
        evaluation.get("requirement").cloned().unwrap_or(Value::Null),
    );
    query.insert(format!("{}_Evaluation", metric.name()), metric_eval);
    Ok(format_dict(&Value::Object(query), false))
}

fn proposal_judge_query(_: &[ChainLinkOutput], _: &[Metric], input: &ChainInput) -> Llm4ReResult<String> {
    let evaluation = judged_evaluation(input)?;
    let query = json!({
        "original_requirement": evaluation.get("requirement").cloned().unwrap_or(Value::Null),
        "improved_requirement": evaluation.get_proposed_requirement(None),
    });
    Ok(format_dict(&query, false))
}

fn fold_judgements(wrapper: &EvalWrapper, mut outputs: Vec<ChainLinkOutput>, input: &ChainInput) -> Evaluation {
    let assessment = outputs
        .pop()
        .map(|o| o.into_evaluation().into_content())
        .unwrap_or(Value::Null);
    let judgements: Map<String, Value> = outputs
        .into_iter()
        .filter_map(|output| {
            let metric = *output.metrics().first()?;
            let mut evaluation = output.into_evaluation();
            evaluation.parse_rating();
            Some((metric.name().to_string(), evaluation.into_content()))
        })
        .collect();
    let content = json!({
        "original_requirement": input.requirement(),
        "evaluation": judgements,
        "Assessment_of_proposed_requirement": assessment,
    });
    wrapper.wrap_rated(content, None)
}

/// Single-step general evaluation, stored with its requirement as a retrieval record.
pub fn retrieval_successive_data(metrics: &[Metric]) -> EvaluationChain {
    let link = ChainLink::new("successive_approach_r5", EvalWrapper::general(metrics.to_vec()))
        .with_metrics(metrics.to_vec());
    let wrapper = EvalWrapper::retrieval_record(EvalWrapper::general(metrics.to_vec()), None);
    EvaluationChain::new(vec![link]).with_reducer(move |outputs, input| {
        let evaluation = outputs
            .into_iter()
            .next()
            .map(|o| o.into_evaluation().into_content())
            .unwrap_or(Value::Null);
        Ok(wrapper.wrap(
            json!({"requirement": input.as_query(), "evaluation": evaluation}),
            None,
        ))
    })
}

/// One evaluation per metric, stored together as a retrieval record.
pub fn retrieval_iterative_data(metrics: &[Metric]) -> EvaluationChain {
    let wrapper = EvalWrapper::retrieval_record(EvalWrapper::metric(), Some(metrics.to_vec()));
    ChainLink::new("evaluation_chain_step", EvalWrapper::metric())
        .iterate_metrics(metrics, false)
        .with_reducer(move |outputs, input| {
            let evaluation: Map<String, Value> = outputs
                .into_iter()
                .filter_map(|output| {
                    let metric = *output.metrics().first()?;
                    Some((metric.name().to_string(), output.into_evaluation().into_content()))
                })
                .collect();
            Ok(wrapper.wrap(
                json!({"requirement": input.as_query(), "evaluation": evaluation}),
                None,
            ))
        })
}
