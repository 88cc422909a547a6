use anyhow::Result;
use llm4re_core::{
    retrieval::DEFAULT_N_DOCUMENTS, CacheConfig, CachedLlmClient, EvaluationChainKind, Evaluator,
    EvaluatorSettings, FsTemplateStore, InMemoryTemplateStore, LlmClient, LlmConfig, MemoryCache,
    OpenAiClient, PromptParts, ResponseGenerator, RetrievalContext, RetrievalDataset, TemplateProcessor,
    TemplateStore,
};
use llm4re_core::template::TemplateContext;
use std::sync::Arc;
use tracing::info;

use crate::config::{PromptArgs, Settings, SINGLE_STEP};

/// Builds evaluators and generators from the application settings
pub struct EvaluationService {
    settings: Settings,
    store: Arc<dyn TemplateStore>,
}

impl EvaluationService {
    pub fn new(settings: Settings) -> Result<Self> {
        let store: Arc<dyn TemplateStore> = match &settings.data_dir {
            Some(dir) => {
                info!("Loading templates from {}", dir.display());
                Arc::new(FsTemplateStore::new(dir))
            }
            None => Arc::new(InMemoryTemplateStore::builtin()?),
        };
        Ok(Self { settings, store })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn llm_client(&self, model: Option<&str>, prompt: &PromptArgs) -> Result<Arc<dyn LlmClient>> {
        let mut config = LlmConfig::new()
            .with_provider(self.settings.provider)
            .with_memory_size(self.settings.memory_size)
            .with_structured_output(!prompt.no_structured_output);
        if let Some(api_key) = &self.settings.api_key {
            config = config.with_api_key(api_key.clone());
        }
        if let Some(model) = model {
            config = config.with_model(model.to_string());
        }
        if let Some(base_url) = &self.settings.base_url {
            config = config.with_base_url(base_url.clone());
        }

        let client = OpenAiClient::new(config)
            .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;
        if !self.settings.cache {
            return Ok(Arc::new(client));
        }
        let cache = Arc::new(MemoryCache::new(CacheConfig::default()));
        Ok(Arc::new(CachedLlmClient::new(Arc::new(client), cache)))
    }

    fn evaluator_settings(&self, base: EvaluatorSettings, prompt: &PromptArgs) -> EvaluatorSettings {
        let mut settings = base
            .with_system_message(!prompt.no_system_message)
            .with_structured_output(!prompt.no_structured_output)
            .with_memory_size(self.settings.memory_size)
            .with_retrieval(prompt.retrieval_data.is_some());
        if let Some(n_shots) = prompt.n_shots {
            settings = settings.with_n_shots(n_shots);
        }
        if let Some(template) = &prompt.template {
            settings = settings.with_template(template.clone());
        }
        if let Some(name) = &prompt.static_few_shots {
            settings = settings.with_static_few_shots(name.clone());
        }
        settings
    }

    /// Evaluator for the requirement model
    pub fn evaluator(&self, prompt: &PromptArgs) -> Result<Evaluator> {
        let mut settings = self.evaluator_settings(EvaluatorSettings::default(), prompt);
        if prompt.approach() != SINGLE_STEP {
            settings = settings.with_chain(prompt.approach().parse()?);
        }
        let llm = self.llm_client(self.settings.model.as_deref(), prompt)?;
        let mut evaluator = Evaluator::new(llm, self.store.clone(), settings).with_metrics(prompt.metrics());
        if let Some(path) = &prompt.retrieval_data {
            let dataset = RetrievalDataset::load(path)?;
            info!(path = %path.display(), "Using retrieval data");
            evaluator = evaluator.with_retrieval(Arc::new(RetrievalContext::lexical(dataset, DEFAULT_N_DOCUMENTS)));
        }
        Ok(evaluator)
    }

    fn judge(&self, prompt: &PromptArgs) -> Result<Evaluator> {
        let model = self.settings.judge_model.as_deref().or(self.settings.model.as_deref());
        let mut judge_prompt = prompt.clone();
        judge_prompt.retrieval_data = None;
        judge_prompt.template = None;
        judge_prompt.static_few_shots = None;
        let settings = self.evaluator_settings(EvaluatorSettings::judge(), &judge_prompt);
        let llm = self.llm_client(model, prompt)?;
        Ok(Evaluator::new(llm, self.store.clone(), settings).with_metrics(prompt.metrics()))
    }

    /// Generator for `prompt`, judged with `judge_approach` when given
    pub fn generator(&self, prompt: &PromptArgs, judge_approach: Option<&str>) -> Result<ResponseGenerator> {
        let metrics = prompt.metrics();
        let mut generator = ResponseGenerator::new(self.evaluator(prompt)?);
        if prompt.approach() != SINGLE_STEP {
            let kind: EvaluationChainKind = prompt.approach().parse()?;
            if kind.is_judge() {
                anyhow::bail!("{} is a judge approach", kind);
            }
            generator = generator.with_chain(kind.build(&metrics));
        }

        if let Some(judge_approach) = judge_approach {
            let chain = match judge_approach {
                SINGLE_STEP => None,
                name => {
                    let kind: EvaluationChainKind = name.parse()?;
                    if !kind.is_judge() {
                        anyhow::bail!("{} is not a judge approach", kind);
                    }
                    Some(kind.build(&metrics))
                }
            };
            generator = generator.with_judge(self.judge(prompt)?, chain);
        }
        Ok(generator)
    }

    /// Processed prompts of `template` for `prompt`, without a model
    pub fn render(&self, template: &str, step: Option<usize>, prompt: &PromptArgs) -> Result<PromptParts> {
        let settings = self.evaluator_settings(EvaluatorSettings::default(), prompt);
        let metrics = prompt.metrics();
        let ctx = TemplateContext {
            metrics: &metrics,
            step,
            n_shots: settings.n_shots,
            use_retrieval: settings.use_retrieval,
            versions: &settings.versions,
            prev_outputs: &[],
        };
        Ok(TemplateProcessor::new(self.store.as_ref()).load_and_process(template, &ctx)?)
    }
}
