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

//! Evaluators: prompt assembly around one LLM client

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::chain::ChainLinkOutput;
use crate::config::EvaluatorSettings;
use crate::errors::Llm4ReResult;
use crate::evaluation::{EvalWrapper, Evaluation};
use crate::helpers::{double_new_lines, format_dict};
use crate::llm::{LlmClient, Message};
use crate::metrics::Metric;
use crate::retrieval::RetrievalContext;
use crate::store::TemplateStore;
use crate::template::{get_sections, remove_comments, PromptParts, SectionKind, TemplateContext, TemplateProcessor};

/// What a chain evaluates: a requirement, or a stored evaluation to be judged
#[derive(Debug, Clone)]
pub enum ChainInput {
    Requirement(String),
    Evaluation(Evaluation),
}

impl ChainInput {
    /// Text sent as `{query}`; stored evaluations are rendered as indented JSON
    pub fn as_query(&self) -> String {
        match self {
            ChainInput::Requirement(requirement) => requirement.clone(),
            ChainInput::Evaluation(evaluation) => format_dict(evaluation.content(), false),
        }
    }

    /// The requirement under evaluation
    pub fn requirement(&self) -> Option<&str> {
        match self {
            ChainInput::Requirement(requirement) => Some(requirement),
            ChainInput::Evaluation(evaluation) => evaluation.get_str("requirement"),
        }
    }
}

impl From<&str> for ChainInput {
    fn from(requirement: &str) -> Self {
        ChainInput::Requirement(requirement.to_string())
    }
}

/// Per-call configuration of an evaluator
#[derive(Debug, Clone)]
pub struct EvaluatorCall {
    pub template: String,
    pub wrapper: EvalWrapper,
    pub metrics: Vec<Metric>,
    pub step: Option<usize>,
    pub prev_outputs: Vec<ChainLinkOutput>,
}

pub struct Evaluator {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn TemplateStore>,
    retrieval: Option<Arc<RetrievalContext>>,
    settings: EvaluatorSettings,
    metrics: Vec<Metric>,
    wrapper: EvalWrapper,
    session_count: AtomicUsize,
}

impl Evaluator {
    /// Evaluator over all metrics; judges wrap general judgements, evaluators
    /// general evaluations.
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn TemplateStore>, settings: EvaluatorSettings) -> Self {
        let metrics = Metric::ALL.to_vec();
        let wrapper = Self::default_wrapper(&settings, &metrics);
        Self {
            llm,
            store,
            retrieval: None,
            settings,
            metrics,
            wrapper,
            session_count: AtomicUsize::new(0),
        }
    }

    fn default_wrapper(settings: &EvaluatorSettings, metrics: &[Metric]) -> EvalWrapper {
        if settings.is_judge() {
            EvalWrapper::general_judgement(metrics.to_vec())
        } else {
            EvalWrapper::general(metrics.to_vec())
        }
    }

    /// Restrict the default call to `metrics`
    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.wrapper = Self::default_wrapper(&self.settings, &metrics);
        self.metrics = metrics;
        self
    }

    pub fn with_wrapper(mut self, wrapper: EvalWrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalContext>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Single-step call with the configured template, wrapper and metrics
    pub fn default_call(&self) -> EvaluatorCall {
        EvaluatorCall {
            template: self.settings.versions.template.clone(),
            wrapper: self.wrapper.clone(),
            metrics: self.metrics.clone(),
            step: None,
            prev_outputs: Vec::new(),
        }
    }

    pub async fn reset_memory(&self) {
        self.session_count.store(0, Ordering::SeqCst);
        self.llm.reset_memory().await;
    }

    /// Point the model at the schema of `wrapper` when structured output is on
    pub async fn update_schema(&self, wrapper: &EvalWrapper) {
        let schema = self.settings.structured_output.then(|| wrapper.schema());
        self.llm.update_schema(schema).await;
    }

    /// Whether this call opens a new memory session.
    ///
    /// Sessions last `memory_size` calls; a stateless model starts one on every call.
    fn start_session(&self) -> bool {
        let window = self.settings.memory_size.max(1);
        let previous = self
            .session_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| Some((count + 1) % window))
            .unwrap_or_default();
        previous == 0 || self.settings.memory_size == 0
    }

    /// Processed system and user prompt of `call`, before runtime substitution
    pub fn prompt_parts(&self, call: &EvaluatorCall) -> Llm4ReResult<PromptParts> {
        let template = self.store.load_template(&call.template)?;
        self.process(&template, call)
    }

    fn process(&self, template: &str, call: &EvaluatorCall) -> Llm4ReResult<PromptParts> {
        let ctx = TemplateContext {
            metrics: &call.metrics,
            step: call.step,
            n_shots: self.settings.n_shots,
            use_retrieval: self.retrieval_active(),
            versions: &self.settings.versions,
            prev_outputs: &call.prev_outputs,
        };
        TemplateProcessor::new(self.store.as_ref()).process_template(template, &ctx)
    }

    fn retrieval_active(&self) -> bool {
        self.settings.use_retrieval && self.retrieval.is_some()
    }

    async fn retrieval_context(
        &self,
        template: &str,
        call: &EvaluatorCall,
        query: &str,
    ) -> Llm4ReResult<Option<String>> {
        let Some(retrieval) = self.retrieval.as_ref().filter(|_| self.retrieval_active()) else {
            return Ok(None);
        };
        if self.settings.n_shots == 0 {
            return Ok(None);
        }
        let Some(one_shot) = get_sections(&remove_comments(template), SectionKind::OneShot)
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        let context = retrieval
            .build_context(query, &one_shot.content, &call.metrics)
            .await?;
        Ok(Some(context))
    }

    fn messages(&self, parts: &PromptParts, user: String) -> Vec<Message> {
        let Some(system) = parts.system.as_ref() else {
            return vec![Message::user(user)];
        };
        if !self.settings.use_system_message {
            return vec![Message::user(double_new_lines(&[system.as_str(), user.as_str()]))];
        }
        if self.start_session() {
            vec![Message::system(system.clone()), Message::user(user)]
        } else {
            vec![Message::user(user)]
        }
    }

    /// Render the prompt of `call` for `query`, ask the model and wrap its answer.
    ///
    /// Judge answers are wrapped without identity check and rated at once;
    /// evaluator answers must evaluate `query`.
    #[instrument(skip_all, fields(template = %call.template, step = ?call.step))]
    pub async fn invoke(&self, call: &EvaluatorCall, query: &str) -> Llm4ReResult<Evaluation> {
        let template = self.store.load_template(&call.template)?;
        let parts = self.process(&template, call)?;
        let context = self.retrieval_context(&template, call, query).await?;
        let user = parts.render_user(query, context.as_deref());
        let messages = self.messages(&parts, user);
        debug!(messages = messages.len(), "Invoking model");

        let raw = self.llm.invoke(&messages).await?;
        let evaluation = if self.settings.is_judge() {
            call.wrapper.wrap_rated(raw, None)
        } else {
            call.wrapper.wrap(raw, Some(query))
        };
        debug!(kind = %evaluation.kind(), "Wrapped model answer");
        Ok(evaluation)
    }

    /// Single-step evaluation of `query` with the default call
    pub async fn evaluate(&self, query: &str) -> Llm4ReResult<Evaluation> {
        let call = self.default_call();
        self.update_schema(&call.wrapper).await;
        self.invoke(&call, query).await
    }
}
