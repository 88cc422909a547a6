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

//! Response contracts for the different evaluation kinds
//!
//! Every wrapper declares the shape an LLM response has to follow and knows
//! how to compute a rating, extract a proposed requirement and recognize a
//! missing proposal for that shape.

use serde_json::{json, Value};

use super::evaluation::Evaluation;
use super::shape::Shape;
use crate::metrics::Metric;

const NO_PROPOSAL: &str = "no proposal";
const MAX_RATING: f64 = 5.0;
const MIN_RATING: f64 = 1.0;

/// How per-metric keys are named in a general judgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgementKeys {
    /// `Assessment_of_<Metric>_Evaluation`
    Assessment,
    /// The bare metric name
    Plain,
}

impl JudgementKeys {
    fn key(&self, metric: Metric) -> String {
        match self {
            JudgementKeys::Assessment => format!("Assessment_of_{}_Evaluation", metric),
            JudgementKeys::Plain => metric.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalWrapper {
    /// Justified evaluation over several metrics with one proposal
    General { metrics: Vec<Metric> },
    /// Justified evaluation of a single metric
    Metric,
    /// Improved requirement suggestion
    ProposedRequirement,
    /// Judgement of a general evaluation
    GeneralJudgement {
        metrics: Vec<Metric>,
        keys: JudgementKeys,
    },
    /// Judgement of a single-metric evaluation
    MetricJudgement,
    /// Judgement of a proposed requirement
    ProposedRequirementJudgement,
    /// Record of a retrieval dataset, wrapping the contract of the evaluation it stores
    RetrievalRecord {
        target: Box<EvalWrapper>,
        expand_for_metrics: Option<Vec<Metric>>,
    },
}

impl EvalWrapper {
    pub fn general(metrics: Vec<Metric>) -> Self {
        EvalWrapper::General { metrics }
    }

    pub fn general_all() -> Self {
        Self::general(Metric::ALL.to_vec())
    }

    pub fn metric() -> Self {
        EvalWrapper::Metric
    }

    pub fn proposed_requirement() -> Self {
        EvalWrapper::ProposedRequirement
    }

    pub fn general_judgement(metrics: Vec<Metric>) -> Self {
        EvalWrapper::GeneralJudgement {
            metrics,
            keys: JudgementKeys::Assessment,
        }
    }

    pub fn metric_judgement() -> Self {
        EvalWrapper::MetricJudgement
    }

    pub fn proposed_requirement_judgement() -> Self {
        EvalWrapper::ProposedRequirementJudgement
    }

    pub fn retrieval_record(target: EvalWrapper, expand_for_metrics: Option<Vec<Metric>>) -> Self {
        EvalWrapper::RetrievalRecord {
            target: Box::new(target),
            expand_for_metrics,
        }
    }

    /// Wrap raw LLM output, validating it against this contract.
    pub fn wrap(&self, content: Value, input_requirement: Option<&str>) -> Evaluation {
        Evaluation::new(content, input_requirement, self.clone())
    }

    /// Wrap and compute the rating straight away.
    pub fn wrap_rated(&self, content: Value, input_requirement: Option<&str>) -> Evaluation {
        let mut evaluation = self.wrap(content, input_requirement);
        evaluation.parse_rating();
        evaluation
    }

    pub fn description(&self) -> &'static str {
        match self {
            EvalWrapper::General { .. } => "justified requirement evaluation based on different metrics",
            EvalWrapper::Metric => "justified evaluation based on a single metric",
            EvalWrapper::ProposedRequirement => "improved requirement suggestion",
            EvalWrapper::GeneralJudgement { .. } => "judgement of a requirement evaluation",
            EvalWrapper::MetricJudgement => "judgement of a single metric evaluation",
            EvalWrapper::ProposedRequirementJudgement => "judgement of a proposed requirement",
            EvalWrapper::RetrievalRecord { .. } => {
                "required format for an evaluation dataset used for retrieval"
            }
        }
    }

    pub fn format_shape(&self) -> Shape {
        match self {
            EvalWrapper::General { metrics } => Shape::object([
                ("requirement", Shape::Str),
                (
                    "evaluation",
                    Shape::object(metrics.iter().map(|m| {
                        (
                            m.name(),
                            Shape::object([("rating", Shape::Int), ("comment", Shape::Str)]),
                        )
                    })),
                ),
                (
                    "proposed_requirement",
                    Shape::object([
                        ("text", Shape::optional(Shape::Str)),
                        (
                            "justification",
                            Shape::optional(Shape::OneOf(vec![Shape::Str, Shape::Dict])),
                        ),
                    ]),
                ),
            ]),
            EvalWrapper::Metric => Shape::object([
                ("requirement", Shape::Str),
                ("rating", Shape::Int),
                ("justification", Shape::Str),
                ("proposed_requirement", Shape::optional(Shape::Str)),
            ]),
            EvalWrapper::ProposedRequirement => Shape::object([
                ("requirement", Shape::Str),
                ("proposed_requirement", Shape::optional(Shape::Str)),
                (
                    "justification",
                    Shape::optional(Shape::OneOf(vec![Shape::Str, Shape::Dict])),
                ),
            ]),
            EvalWrapper::GeneralJudgement { metrics, keys } => Shape::object([
                ("original_requirement", Shape::Str),
                (
                    "evaluation",
                    Shape::object(metrics.iter().map(|m| {
                        (
                            keys.key(*m),
                            Shape::object([("rating", Shape::OneOf(vec![Shape::Int, Shape::Float]))]),
                        )
                    })),
                ),
                ("Assessment_of_proposed_requirement", Shape::Dict),
            ]),
            EvalWrapper::MetricJudgement => Shape::object([
                ("accuracy_of_rating", Shape::Int),
                ("comment_on_accuracy", Shape::Str),
                ("quality_of_justification", Shape::Int),
                ("comment_on_quality", Shape::Str),
            ]),
            EvalWrapper::ProposedRequirementJudgement => Shape::object([
                ("overall_alignment_with_metrics", Shape::Int),
                ("comment", Shape::Str),
            ]),
            EvalWrapper::RetrievalRecord {
                target,
                expand_for_metrics,
            } => {
                let evaluation = match expand_for_metrics {
                    Some(metrics) => {
                        Shape::object(metrics.iter().map(|m| (m.name(), target.format_shape())))
                    }
                    None => target.format_shape(),
                };
                Shape::object([("requirement", Shape::Str), ("evaluation", evaluation)])
            }
        }
    }

    fn limit_schema_layers(&self) -> Option<usize> {
        match self {
            EvalWrapper::GeneralJudgement { .. } => Some(1),
            _ => None,
        }
    }

    /// Structured-output schema generated from the declared shape
    pub fn schema(&self) -> Value {
        self.format_shape().json_schema(
            "EvaluationSchema",
            Some(self.description()),
            self.limit_schema_layers(),
        )
    }

    pub(crate) fn rate(&self, content: &mut Value) -> Option<f64> {
        match self {
            EvalWrapper::General { .. } => rate_general(content),
            EvalWrapper::Metric => content.get("rating").and_then(Value::as_f64),
            EvalWrapper::ProposedRequirement => Some(0.0),
            EvalWrapper::GeneralJudgement { .. } => {
                let ratings: Vec<f64> = content
                    .get("evaluation")?
                    .as_object()?
                    .values()
                    .filter_map(|m| m.get("rating").and_then(Value::as_f64))
                    .collect();
                if ratings.is_empty() {
                    return None;
                }
                let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
                let normalized = (mean - MIN_RATING) / (MAX_RATING - MIN_RATING);
                content
                    .as_object_mut()?
                    .insert("overall_evaluation_rating".to_string(), json!(normalized));
                Some(normalized)
            }
            EvalWrapper::MetricJudgement => {
                let accuracy = content.get("accuracy_of_rating")?.as_f64()?;
                let quality = content.get("quality_of_justification")?.as_f64()?;
                let rating = 0.6 * accuracy + 0.4 * quality;
                content
                    .as_object_mut()?
                    .insert("rating".to_string(), json!(rating));
                Some(rating)
            }
            EvalWrapper::ProposedRequirementJudgement => content
                .get("overall_alignment_with_metrics")
                .and_then(Value::as_f64),
            EvalWrapper::RetrievalRecord { .. } => None,
        }
    }

    pub(crate) fn extract_proposal(&self, content: &Value) -> Option<String> {
        match self {
            EvalWrapper::General { .. } => content
                .get("proposed_requirement")
                .and_then(|p| p.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => match content.get("proposed_requirement") {
                None => Some(NO_PROPOSAL.to_string()),
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) => None,
                Some(other) => Some(other.to_string()),
            },
        }
    }

    pub(crate) fn signals_no_proposal(&self, content: &Value) -> bool {
        match self {
            EvalWrapper::General { .. } | EvalWrapper::Metric | EvalWrapper::ProposedRequirement => {
                match self.extract_proposal(content) {
                    None => true,
                    Some(p) => p.trim().is_empty() || p.to_lowercase().starts_with(NO_PROPOSAL),
                }
            }
            _ => false,
        }
    }
}

/// Sum of (rating - offset) over the evaluated metrics, rescaled against the
/// offsets of every metric: all seven at rating 1 map to 0, all at 5 map to 1.
fn rate_general(content: &mut Value) -> Option<f64> {
    let offsets: f64 = Metric::ALL.iter().map(|m| m.offset() as f64).sum();
    let min_rating = MIN_RATING * Metric::ALL.len() as f64 - offsets;
    let max_rating = MAX_RATING * Metric::ALL.len() as f64 - offsets;

    let evaluation = content.get_mut("evaluation")?.as_object_mut()?;
    let mut cumulative = 0.0;
    for (name, entry) in evaluation.iter_mut() {
        let Ok(metric) = name.parse::<Metric>() else {
            continue;
        };
        let rating = entry.get("rating").and_then(Value::as_f64)?;
        entry
            .as_object_mut()?
            .insert("rating_threshold".to_string(), json!(metric.offset()));
        cumulative += rating - metric.offset() as f64;
    }

    let span = max_rating - min_rating;
    let overall = (cumulative - min_rating) / span;
    let threshold = (0.0 - min_rating) / span;
    let obj = content.as_object_mut()?;
    obj.insert("overall_rating".to_string(), json!(overall));
    obj.insert("overall_rating_threshold".to_string(), json!(threshold));
    Some(overall)
}
