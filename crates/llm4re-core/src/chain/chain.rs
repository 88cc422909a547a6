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

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::link::{ChainLink, ChainLinkOutput};
use crate::errors::{Llm4ReError, Llm4ReResult};
use crate::evaluation::Evaluation;
use crate::evaluator::{ChainInput, Evaluator};
use crate::metrics::Metric;

/// Combines all link outputs into the final evaluation
pub type Reducer = Arc<dyn Fn(Vec<ChainLinkOutput>, &ChainInput) -> Llm4ReResult<Evaluation> + Send + Sync>;

/// An ordered sequence of links sharing one evaluator
#[derive(Clone, Default)]
pub struct EvaluationChain {
    links: Vec<ChainLink>,
    reducer: Option<Reducer>,
}

impl EvaluationChain {
    pub fn new(links: Vec<ChainLink>) -> Self {
        Self { links, reducer: None }
    }

    pub fn with_reducer<F>(mut self, reducer: F) -> Self
    where
        F: Fn(Vec<ChainLinkOutput>, &ChainInput) -> Llm4ReResult<Evaluation> + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn into_links(self) -> Vec<ChainLink> {
        self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Replicate the whole link sequence once per metric.
    ///
    /// Copy `i` of each link evaluates `metrics[i]` at the link's step plus
    /// `i`. When every link shares one wrapper only the first round updates
    /// the model schema. With `initial_memory_reset` the first produced link
    /// resets the model memory. The reducer is not carried over.
    pub fn iterate_metrics(&self, metrics: &[Metric], initial_memory_reset: bool) -> Self {
        let shared_wrapper = self
            .links
            .first()
            .map_or(true, |first| self.links.iter().all(|l| l.wrapper == first.wrapper));

        let mut links: Vec<ChainLink> = metrics
            .iter()
            .enumerate()
            .flat_map(|(i, metric)| {
                self.links.iter().map(move |link| {
                    let mut copy = link.clone();
                    copy.metrics = vec![*metric];
                    copy.step = link.step + i;
                    if shared_wrapper && i > 0 {
                        copy.update_model_schema = false;
                    }
                    copy
                })
            })
            .collect();

        if initial_memory_reset {
            if let Some(first) = links.first_mut() {
                first.reset_memory = true;
            }
        }
        Self::new(links)
    }

    /// Run the links in order; each sees the outputs of all earlier links
    /// through its selector.
    #[instrument(skip_all, fields(links = self.links.len()))]
    pub async fn invoke(&self, evaluator: &Evaluator, input: &ChainInput) -> Llm4ReResult<Evaluation> {
        if self.links.is_empty() {
            return Err(Llm4ReError::EmptyChain);
        }
        let mut outputs: Vec<ChainLinkOutput> = Vec::with_capacity(self.links.len());
        for link in &self.links {
            let output = link.invoke(evaluator, input, &outputs).await?;
            debug!(
                step = output.step(),
                kind = %output.evaluation().kind(),
                "Chain link finished"
            );
            outputs.push(output);
        }

        match &self.reducer {
            Some(reducer) => reducer(outputs, input),
            None => outputs
                .pop()
                .map(ChainLinkOutput::into_evaluation)
                .ok_or(Llm4ReError::EmptyChain),
        }
    }
}

impl fmt::Debug for EvaluationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationChain")
            .field("links", &self.links)
            .field("reducer", &self.reducer.as_ref().map(|_| ".."))
            .finish()
    }
}

impl BitOr<ChainLink> for EvaluationChain {
    type Output = EvaluationChain;

    fn bitor(self, rhs: ChainLink) -> EvaluationChain {
        let mut links = self.links;
        links.push(rhs);
        EvaluationChain::new(links)
    }
}

impl BitOr<EvaluationChain> for EvaluationChain {
    type Output = EvaluationChain;

    fn bitor(self, rhs: EvaluationChain) -> EvaluationChain {
        let mut links = self.links;
        links.extend(rhs.links);
        EvaluationChain::new(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PrevOutputSelector;
    use crate::config::EvaluatorSettings;
    use crate::evaluation::EvalWrapper;
    use crate::llm::{Message, MockLlmClient};
    use crate::store::InMemoryTemplateStore;
    use mockall::Sequence;
    use serde_json::json;
    use std::sync::Mutex;

    fn metric_link(template: &str) -> ChainLink {
        ChainLink::new(template, EvalWrapper::metric())
    }

    #[test]
    fn test_iterate_metrics_steps_and_schema_updates() {
        let chain = metric_link("step").iterate_metrics(&[Metric::Atomicity, Metric::Unambiguity, Metric::Verifiability], true);
        let links = chain.links();
        assert_eq!(links.len(), 3);
        assert_eq!(links.iter().map(|l| l.step).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(links[1].metrics, vec![Metric::Unambiguity]);
        assert!(links[0].update_model_schema);
        assert!(!links[1].update_model_schema && !links[2].update_model_schema);
        assert!(links[0].reset_memory);
        assert!(!links[1].reset_memory);
    }

    #[test]
    fn test_iterate_metrics_mixed_wrappers_keep_updates() {
        let pair = metric_link("step") | ChainLink::new("end", EvalWrapper::proposed_requirement()).with_step(5);
        let chain = pair.iterate_metrics(&[Metric::Atomicity, Metric::Completeness], false);
        let links = chain.links();
        assert_eq!(links.len(), 4);
        assert_eq!(
            links.iter().map(|l| (l.template.as_str(), l.step)).collect::<Vec<_>>(),
            vec![("step", 1), ("end", 5), ("step", 2), ("end", 6)]
        );
        assert!(links.iter().all(|l| l.update_model_schema));
        assert!(!links[0].reset_memory);
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let evaluator = Evaluator::new(
            Arc::new(MockLlmClient::new()),
            Arc::new(InMemoryTemplateStore::new()),
            EvaluatorSettings::default(),
        );
        let result = EvaluationChain::default()
            .invoke(&evaluator, &ChainInput::Requirement("R".to_string()))
            .await;
        assert!(matches!(result, Err(Llm4ReError::EmptyChain)));
    }

    #[tokio::test]
    async fn test_links_see_selected_prior_outputs() {
        let store = InMemoryTemplateStore::new()
            .with_template(
                "first",
                "first link\n[section/user_prompt]:# (u)\n{query}\n[section/user_prompt end]:# (u)\n",
            )
            .with_template(
                "next",
                "[section/user_prompt]:# (u)\n\
[section/chain_context]:# (c)\nseen {cc_id}: {cc_just}\n[section/chain_context end]:# (c)\n\
{query}\n[section/user_prompt end]:# (u)\n",
            );

        let prompts = Arc::new(Mutex::new(Vec::new()));
        let recorded = prompts.clone();
        let mut llm = MockLlmClient::new();
        llm.expect_update_schema().returning(|_| ());
        llm.expect_reset_memory().returning(|| ());
        let mut seq = Sequence::new();
        for step in 1..=3 {
            let recorded = recorded.clone();
            llm.expect_invoke()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |messages: &[Message]| {
                    recorded.lock().unwrap().push(messages.last().unwrap().content.clone());
                    Ok(json!({
                        "requirement": "R",
                        "rating": 4,
                        "justification": format!("because {}", step)
                    }))
                });
        }

        let evaluator = Evaluator::new(
            Arc::new(llm),
            Arc::new(store),
            EvaluatorSettings::default().with_n_shots(0),
        );
        let chain = metric_link("first")
            | metric_link("next").with_step(2)
            | metric_link("next").with_step(3).with_selector(PrevOutputSelector::all());

        let result = chain
            .invoke(&evaluator, &ChainInput::Requirement("R".to_string()))
            .await
            .unwrap();
        assert_eq!(result.get_str("justification"), Some("because 3"));

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts[0], "R");
        assert_eq!(prompts[1], "R");
        assert_eq!(prompts[2], "seen 1: because 1\n\nseen 2: because 2\nR");
    }
}
