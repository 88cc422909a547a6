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

//! A single stage of an evaluation chain

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::debug;

use super::chain::EvaluationChain;
use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::evaluation::{EvalWrapper, Evaluation};
use crate::evaluator::{ChainInput, Evaluator, EvaluatorCall};
use crate::metrics::Metric;

/// Result of one link invocation
#[derive(Debug, Clone)]
pub struct ChainLinkOutput {
    evaluation: Evaluation,
    metrics: Vec<Metric>,
    step: usize,
}

impl ChainLinkOutput {
    pub fn new(evaluation: Evaluation, metrics: Vec<Metric>, step: usize) -> Self {
        Self {
            evaluation,
            metrics,
            step,
        }
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn into_evaluation(self) -> Evaluation {
        self.evaluation
    }
}

/// Chooses the prior outputs a link gets to see
pub type OutputFilter = Arc<dyn Fn(&[ChainLinkOutput]) -> Vec<ChainLinkOutput> + Send + Sync>;

#[derive(Clone, Default)]
pub enum PrevOutputSelector {
    /// No prior outputs
    #[default]
    None,
    /// Outputs at the given positions; negative positions count from the end
    ByIndices(Vec<isize>),
    /// Outputs in `start..end`, both ends optional and allowed to be negative
    ByRange {
        start: Option<isize>,
        end: Option<isize>,
    },
    /// Arbitrary selection over the full output list
    ByPredicate(OutputFilter),
}

impl PrevOutputSelector {
    /// Every prior output
    pub fn all() -> Self {
        PrevOutputSelector::ByRange {
            start: None,
            end: None,
        }
    }

    pub fn predicate<F>(filter: F) -> Self
    where
        F: Fn(&[ChainLinkOutput]) -> Vec<ChainLinkOutput> + Send + Sync + 'static,
    {
        PrevOutputSelector::ByPredicate(Arc::new(filter))
    }

    pub fn select(&self, outputs: &[ChainLinkOutput]) -> Llm4ReResult<Vec<ChainLinkOutput>> {
        let len = outputs.len() as isize;
        match self {
            PrevOutputSelector::None => Ok(Vec::new()),
            PrevOutputSelector::ByIndices(indices) => indices
                .iter()
                .map(|&i| {
                    let pos = if i < 0 { len + i } else { i };
                    usize::try_from(pos)
                        .ok()
                        .and_then(|p| outputs.get(p))
                        .cloned()
                        .ok_or_else(|| Llm4ReError::InvalidSelector {
                            message: format!("index {} out of range for {} outputs", i, len),
                        })
                })
                .collect(),
            PrevOutputSelector::ByRange { start, end } => {
                let clamp = |bound: isize| -> usize {
                    let pos = if bound < 0 { len + bound } else { bound };
                    pos.clamp(0, len) as usize
                };
                let from = start.map_or(0, clamp);
                let to = end.map_or(outputs.len(), clamp);
                Ok(if from < to {
                    outputs[from..to].to_vec()
                } else {
                    Vec::new()
                })
            }
            PrevOutputSelector::ByPredicate(filter) => Ok(filter(outputs)),
        }
    }
}

impl fmt::Debug for PrevOutputSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrevOutputSelector::None => f.write_str("None"),
            PrevOutputSelector::ByIndices(indices) => f.debug_tuple("ByIndices").field(indices).finish(),
            PrevOutputSelector::ByRange { start, end } => f
                .debug_struct("ByRange")
                .field("start", start)
                .field("end", end)
                .finish(),
            PrevOutputSelector::ByPredicate(_) => f.write_str("ByPredicate(..)"),
        }
    }
}

/// Turns the chain input into the query of one link, given all prior outputs
/// and the link's metrics
pub type InputTransform =
    Arc<dyn Fn(&[ChainLinkOutput], &[Metric], &ChainInput) -> Llm4ReResult<String> + Send + Sync>;

fn passthrough() -> InputTransform {
    Arc::new(|_, _, input| Ok(input.as_query()))
}

#[derive(Clone)]
pub struct ChainLink {
    pub template: String,
    pub wrapper: EvalWrapper,
    pub metrics: Vec<Metric>,
    pub step: usize,
    pub selector: PrevOutputSelector,
    pub input_transform: InputTransform,
    pub reset_memory: bool,
    pub update_model_schema: bool,
}

impl ChainLink {
    pub fn new(template: impl Into<String>, wrapper: EvalWrapper) -> Self {
        Self {
            template: template.into(),
            wrapper,
            metrics: Metric::ALL.to_vec(),
            step: 1,
            selector: PrevOutputSelector::None,
            input_transform: passthrough(),
            reset_memory: false,
            update_model_schema: true,
        }
    }

    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_selector(mut self, selector: PrevOutputSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_input_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&[ChainLinkOutput], &[Metric], &ChainInput) -> Llm4ReResult<String> + Send + Sync + 'static,
    {
        self.input_transform = Arc::new(transform);
        self
    }

    pub fn with_reset_memory(mut self, reset_memory: bool) -> Self {
        self.reset_memory = reset_memory;
        self
    }

    pub fn with_update_model_schema(mut self, update_model_schema: bool) -> Self {
        self.update_model_schema = update_model_schema;
        self
    }

    /// Per-call configuration for the evaluator, seeing `prev_outputs` through the selector
    pub fn evaluator_call(&self, prev_outputs: &[ChainLinkOutput]) -> Llm4ReResult<EvaluatorCall> {
        Ok(EvaluatorCall {
            template: self.template.clone(),
            wrapper: self.wrapper.clone(),
            metrics: self.metrics.clone(),
            step: Some(self.step),
            prev_outputs: self.selector.select(prev_outputs)?,
        })
    }

    /// One link copy per metric; see [`EvaluationChain::iterate_metrics`].
    pub fn iterate_metrics(self, metrics: &[Metric], initial_memory_reset: bool) -> EvaluationChain {
        EvaluationChain::new(vec![self]).iterate_metrics(metrics, initial_memory_reset)
    }

    pub async fn invoke(
        &self,
        evaluator: &Evaluator,
        input: &ChainInput,
        prev_outputs: &[ChainLinkOutput],
    ) -> Llm4ReResult<ChainLinkOutput> {
        let call = self.evaluator_call(prev_outputs)?;
        debug!(
            template = %self.template,
            step = self.step,
            visible_outputs = call.prev_outputs.len(),
            "Invoking chain link"
        );
        if self.reset_memory {
            evaluator.reset_memory().await;
        }
        if self.update_model_schema {
            evaluator.update_schema(&self.wrapper).await;
        }
        let query = (self.input_transform)(prev_outputs, &self.metrics, input)?;
        let evaluation = evaluator.invoke(&call, &query).await?;
        Ok(ChainLinkOutput::new(evaluation, self.metrics.clone(), self.step))
    }
}

impl fmt::Debug for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainLink")
            .field("template", &self.template)
            .field("wrapper", &self.wrapper)
            .field("metrics", &self.metrics)
            .field("step", &self.step)
            .field("selector", &self.selector)
            .field("reset_memory", &self.reset_memory)
            .field("update_model_schema", &self.update_model_schema)
            .finish()
    }
}

impl BitOr<ChainLink> for ChainLink {
    type Output = EvaluationChain;

    fn bitor(self, rhs: ChainLink) -> EvaluationChain {
        EvaluationChain::new(vec![self, rhs])
    }
}

impl BitOr<EvaluationChain> for ChainLink {
    type Output = EvaluationChain;

    fn bitor(self, rhs: EvaluationChain) -> EvaluationChain {
        let mut links = vec![self];
        links.extend(rhs.into_links());
        EvaluationChain::new(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(n: usize) -> Vec<ChainLinkOutput> {
        (1..=n)
            .map(|step| {
                let evaluation = EvalWrapper::metric().wrap(json!({"step": step}), None);
                ChainLinkOutput::new(evaluation, vec![Metric::Atomicity], step)
            })
            .collect()
    }

    fn steps(selected: &[ChainLinkOutput]) -> Vec<usize> {
        selected.iter().map(ChainLinkOutput::step).collect()
    }

    #[test]
    fn test_selector_none_and_all() {
        let outs = outputs(3);
        assert!(PrevOutputSelector::None.select(&outs).unwrap().is_empty());
        assert_eq!(steps(&PrevOutputSelector::all().select(&outs).unwrap()), vec![1, 2, 3]);
        assert!(PrevOutputSelector::all().select(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_selector_indices() {
        let outs = outputs(3);
        let selected = PrevOutputSelector::ByIndices(vec![0, -1]).select(&outs).unwrap();
        assert_eq!(steps(&selected), vec![1, 3]);
        assert!(PrevOutputSelector::ByIndices(vec![])
            .select(&outs)
            .unwrap()
            .is_empty());
        assert!(matches!(
            PrevOutputSelector::ByIndices(vec![3]).select(&outs),
            Err(Llm4ReError::InvalidSelector { .. })
        ));
        assert!(PrevOutputSelector::ByIndices(vec![-4]).select(&outs).is_err());
    }

    #[test]
    fn test_selector_range() {
        let outs = outputs(4);
        let range = |start, end| PrevOutputSelector::ByRange { start, end };
        assert_eq!(steps(&range(Some(1), None).select(&outs).unwrap()), vec![2, 3, 4]);
        assert_eq!(steps(&range(None, Some(-1)).select(&outs).unwrap()), vec![1, 2, 3]);
        assert_eq!(steps(&range(Some(-2), Some(10)).select(&outs).unwrap()), vec![3, 4]);
        assert!(range(Some(3), Some(1)).select(&outs).unwrap().is_empty());
    }

    #[test]
    fn test_selector_predicate() {
        let outs = outputs(4);
        let even = PrevOutputSelector::predicate(|outs| {
            outs.iter().filter(|o| o.step() % 2 == 0).cloned().collect()
        });
        assert_eq!(steps(&even.select(&outs).unwrap()), vec![2, 4]);
    }

    #[test]
    fn test_link_defaults_and_call() {
        let link = ChainLink::new("evaluation_chain_step", EvalWrapper::metric());
        assert_eq!(link.step, 1);
        assert_eq!(link.metrics.len(), 7);
        assert!(link.update_model_schema);
        assert!(!link.reset_memory);

        let input = ChainInput::Requirement("R".to_string());
        assert_eq!((link.input_transform)(&[], &link.metrics, &input).unwrap(), "R");

        let call = link
            .with_step(3)
            .with_selector(PrevOutputSelector::all())
            .evaluator_call(&outputs(2))
            .unwrap();
        assert_eq!(call.step, Some(3));
        assert_eq!(call.prev_outputs.len(), 2);
    }

    #[test]
    fn test_bitor_composes_links() {
        let a = ChainLink::new("a", EvalWrapper::metric());
        let b = ChainLink::new("b", EvalWrapper::proposed_requirement());
        let c = ChainLink::new("c", EvalWrapper::metric());
        let chain = a | (b | c);
        let names: Vec<&str> = chain.links().iter().map(|l| l.template.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
