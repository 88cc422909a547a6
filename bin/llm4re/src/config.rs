use clap::{Args as ClapArgs, Parser, Subcommand};
use llm4re_core::{EvalType, LlmProvider, Metric};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Name of the approach that evaluates with a single prompt
pub const SINGLE_STEP: &str = "single_step";

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(name = "llm4re")]
#[clap(about = "Evaluate the quality of natural-language requirements with LLMs")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate a single requirement and print the result
    Evaluate {
        requirement: String,

        #[clap(flatten)]
        prompt: PromptArgs,

        /// Judge the evaluation with the judge model
        #[clap(long)]
        judge: bool,

        #[clap(long, help = "Judge approach (single_step or judge_chain)")]
        judge_approach: Option<String>,
    },
    /// Evaluate a dataset, or judge the evaluations of one
    Dataset {
        #[clap(long, help = "JSON list of requirements, or an evaluations file when judging")]
        input: PathBuf,

        #[clap(long, default_value = "data/evaluations")]
        output_dir: PathBuf,

        #[clap(long, help = "Dataset name used in output file names (default: input file stem)")]
        dataset_name: Option<String>,

        #[clap(long, default_value = "evaluations", help = "evaluations or judgements")]
        eval_type: EvalType,

        #[clap(flatten)]
        prompt: PromptArgs,

        #[clap(long, default_value = SINGLE_STEP, help = "Judge approach (single_step or judge_chain)")]
        judge_approach: String,

        #[clap(long, help = "Exclusive index at which to stop")]
        stop_idx: Option<usize>,

        #[clap(long, default_value_t = llm4re_core::dataset::DEFAULT_RECURSION_LIMIT)]
        recursion_limit: usize,

        /// Recompute the ratings of an existing output file instead of generating
        #[clap(long)]
        reparse: bool,
    },
    /// Print the processed prompts of a template
    Render {
        template: String,

        #[clap(long, help = "Requirement substituted for {query}")]
        requirement: Option<String>,

        #[clap(long, help = "Chain step used for metric ids")]
        step: Option<usize>,

        #[clap(flatten)]
        prompt: PromptArgs,
    },
}

/// Prompt options shared by the subcommands
#[derive(ClapArgs, Debug, Clone)]
pub struct PromptArgs {
    #[clap(long, help = "Approach: single_step or an evaluation chain name")]
    pub approach: Option<String>,

    #[clap(long, help = "Prompt template for single-step evaluation")]
    pub template: Option<String>,

    #[clap(long, value_delimiter = ',', help = "Metrics to evaluate (default: all)")]
    pub metrics: Vec<Metric>,

    #[clap(long, help = "Number of few-shot examples")]
    pub n_shots: Option<usize>,

    #[clap(long, help = "Static few-shot set")]
    pub static_few_shots: Option<String>,

    #[clap(long, help = "Retrieval dataset used to select examples")]
    pub retrieval_data: Option<PathBuf>,

    /// Send the system prompt as part of the user message
    #[clap(long)]
    pub no_system_message: bool,

    /// Ask for plain JSON instead of a response schema
    #[clap(long)]
    pub no_structured_output: bool,
}

impl PromptArgs {
    pub fn approach(&self) -> &str {
        self.approach.as_deref().unwrap_or(SINGLE_STEP)
    }

    pub fn metrics(&self) -> Vec<Metric> {
        if self.metrics.is_empty() {
            Metric::ALL.to_vec()
        } else {
            self.metrics.clone()
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Provider of the OpenAI-compatible API
    pub provider: LlmProvider,

    /// API key of the provider
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model evaluating requirements
    pub model: Option<String>,

    /// Model judging evaluations
    pub judge_model: Option<String>,

    /// Base URL override
    pub base_url: Option<String>,

    /// Directory with prompt templates and lookup data; bundled data when unset
    pub data_dir: Option<PathBuf>,

    /// Number of exchanges the models remember
    pub memory_size: usize,

    /// Cache model responses in memory
    pub cache: bool,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let provider = match env::var("LLM4RE_PROVIDER") {
            Ok(name) => name
                .parse()
                .map_err(|e| anyhow::anyhow!("LLM4RE_PROVIDER: {}", e))?,
            Err(_) => LlmProvider::default(),
        };

        let settings = Settings {
            provider,
            api_key: env::var("LLM4RE_API_KEY").ok(),
            model: env::var("LLM4RE_MODEL").ok(),
            judge_model: env::var("LLM4RE_JUDGE_MODEL").ok(),
            base_url: env::var("LLM4RE_BASE_URL").ok(),
            data_dir: env::var("LLM4RE_DATA_DIR").ok().map(PathBuf::from),
            memory_size: env::var("LLM4RE_MEMORY_SIZE")
                .map(|s| s.parse().unwrap_or(0))
                .unwrap_or(0),
            cache: env::var("LLM4RE_CACHE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
        };

        Ok(settings)
    }

    /// Model name used in output file names
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}
