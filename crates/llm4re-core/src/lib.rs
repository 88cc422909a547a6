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

//! # llm4re Core
//!
//! LLM-based quality evaluation of natural-language requirements.
//!
//! This crate provides prompt-template processing, a validated response
//! contract around raw LLM output, and multi-step evaluation chains that
//! feed earlier answers into later prompts.

pub mod cache;
pub mod chain;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod evaluation;
pub mod evaluator;
pub mod generation;
pub mod helpers;
pub mod llm;
pub mod metrics;
pub mod retrieval;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use errors::{Llm4ReError, Llm4ReResult, LlmError, LlmResult};
pub use metrics::Metric;

// Re-export traits
pub use cache::Cache;
pub use llm::LlmClient;
pub use retrieval::Retriever;
pub use store::TemplateStore;

// Re-export concrete types
pub use cache::{CacheConfig, MemoryCache};
pub use chain::{ChainLink, ChainLinkOutput, EvaluationChain, EvaluationChainKind, PrevOutputSelector};
pub use config::{EvaluatorRole, EvaluatorSettings, PromptVersions};
pub use dataset::{evaluate_dataset, reparse_ratings, DatasetOutput, DatasetRun, DatasetSummary, EvalType};
pub use evaluation::{ErrorKind, EvalWrapper, Evaluation};
pub use evaluator::{ChainInput, Evaluator, EvaluatorCall};
pub use generation::ResponseGenerator;
pub use llm::{CachedLlmClient, LlmConfig, LlmProvider, Message, OpenAiClient};
pub use retrieval::{LexicalRetriever, RetrievalContext, RetrievalDataset, RetrievedDocument};
pub use store::{FsTemplateStore, InMemoryTemplateStore};
pub use template::{PromptParts, TemplateProcessor};
